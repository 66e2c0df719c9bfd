//! Scripted collaborators for unit tests

use async_trait::async_trait;
use mdcache_common::{
    Error, ManagedInstance, ManagedReplicaSet, RestAuthData, Result, ServerMode, TcpAddress,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::reader::{FetchRequest, MetadataReader, RestAuthSource};

/// Metadata reader answering from a per-server script
///
/// Servers without a scripted answer behave as unreachable.
#[derive(Default)]
pub struct ScriptedReader {
    responses: Mutex<HashMap<TcpAddress, Result<Vec<ManagedReplicaSet>>>>,
    calls: Mutex<Vec<(TcpAddress, Instant)>>,
    requests: Mutex<Vec<FetchRequest>>,
    delay: Mutex<Option<Duration>>,
    panic_on_fetch: AtomicBool,
    notifications: Option<watch::Receiver<u64>>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(notifications: watch::Receiver<u64>) -> Self {
        Self {
            notifications: Some(notifications),
            ..Self::default()
        }
    }

    pub fn set(&self, server: &TcpAddress, response: Result<Vec<ManagedReplicaSet>>) {
        self.responses.lock().insert(server.clone(), response);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make every following fetch panic
    pub fn panic_on_fetch(&self) {
        self.panic_on_fetch.store(true, Ordering::SeqCst);
    }

    /// Servers contacted, in order
    pub fn calls(&self) -> Vec<TcpAddress> {
        self.calls.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    /// When each fetch started
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, t)| *t).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_request(&self) -> Option<FetchRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl MetadataReader for ScriptedReader {
    async fn fetch(
        &self,
        server: &TcpAddress,
        request: &FetchRequest,
    ) -> Result<Vec<ManagedReplicaSet>> {
        self.calls.lock().push((server.clone(), Instant::now()));
        self.requests.lock().push(request.clone());
        assert!(
            !self.panic_on_fetch.load(Ordering::SeqCst),
            "scripted reader failure"
        );

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.responses
            .lock()
            .get(server)
            .cloned()
            .unwrap_or_else(|| Err(Error::connection(server, "connection refused")))
    }

    fn cluster_notifications(&self) -> Option<watch::Receiver<u64>> {
        self.notifications.clone()
    }
}

/// REST auth source answering from a script
pub struct ScriptedAuthSource {
    response: Mutex<Result<HashMap<String, RestAuthData>>>,
    calls: Mutex<usize>,
}

impl ScriptedAuthSource {
    pub fn new(response: Result<HashMap<String, RestAuthData>>) -> Self {
        Self {
            response: Mutex::new(response),
            calls: Mutex::new(0),
        }
    }

    pub fn set(&self, response: Result<HashMap<String, RestAuthData>>) {
        *self.response.lock() = response;
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl RestAuthSource for ScriptedAuthSource {
    async fn fetch_rest_users(&self) -> Result<HashMap<String, RestAuthData>> {
        *self.calls.lock() += 1;
        self.response.lock().clone()
    }
}

/// Single-primary replicaset with `primary` as the writable member
pub fn replicaset(name: &str, uuids: &[&str], primary: &str) -> ManagedReplicaSet {
    let members = uuids
        .iter()
        .enumerate()
        .map(|(i, uuid)| {
            let mode = if *uuid == primary {
                ServerMode::ReadWrite
            } else {
                ServerMode::ReadOnly
            };
            let port = 3306 + u16::try_from(i).unwrap_or(0);
            ManagedInstance::new(name, *uuid, mode, "127.0.0.1", port, port * 10)
        })
        .collect();
    ManagedReplicaSet::new(name, members)
}
