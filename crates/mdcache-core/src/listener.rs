//! Observer registries for topology changes
//!
//! Two keyed registries map a replicaset name to the observers interested
//! in it:
//! - state listeners, told about the new member list after a change
//! - acceptor update handlers, asked to update their listening sockets when
//!   the acceptor toggle is armed
//!
//! Dispatch works on a copy of the observer list, so an observer may
//! unregister itself (or others) from inside its callback.

use mdcache_common::LookupResult;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::snapshot::TopologySnapshot;

/// Observer of replicaset membership changes
pub trait ReplicasetStateListener: Send + Sync {
    /// Called on the refresh task when the replicaset changed
    ///
    /// `md_servers_reachable` tells whether the data came from a reachable
    /// metadata server, `view_id` is the metadata view (replica-set
    /// clusters). Must not block for long: it delays the next refresh.
    fn notify_instances_changed(
        &self,
        instances: &LookupResult,
        md_servers_reachable: bool,
        view_id: u64,
    );
}

/// Observer deciding the state of listening socket acceptors
pub trait AcceptorUpdateHandler: Send + Sync {
    /// Update acceptors for the allowed instances; `false` asks for a retry
    /// on the next refresh
    fn update_socket_acceptor_state(&self, instances: &LookupResult) -> bool;
}

/// Name-keyed multimap of observers, in registration order
struct Registry<L: ?Sized> {
    entries: Mutex<HashMap<String, Vec<Arc<L>>>>,
}

impl<L: ?Sized> Registry<L> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn add(&self, name: &str, listener: Arc<L>) -> bool {
        let mut entries = self.entries.lock();
        let listeners = entries.entry(name.to_string()).or_default();
        if listeners.iter().any(|l| same_listener(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    fn remove(&self, name: &str, listener: &Arc<L>) -> bool {
        let mut entries = self.entries.lock();
        let Some(listeners) = entries.get_mut(name) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            entries.remove(name);
        }
        removed
    }

    fn copy_of(&self, name: &str) -> Vec<Arc<L>> {
        self.entries.lock().get(name).cloned().unwrap_or_default()
    }

    /// Registered names, sorted
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn len(&self, name: &str) -> usize {
        self.entries.lock().get(name).map_or(0, Vec::len)
    }
}

/// Identity of an observer is the allocation it lives in
fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Registry of state listeners and acceptor update handlers
pub struct ListenerRegistry {
    state: Registry<dyn ReplicasetStateListener>,
    acceptors: Registry<dyn AcceptorUpdateHandler>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Registry::new(),
            acceptors: Registry::new(),
        }
    }

    /// Register a state listener; no-op if already registered
    pub fn add_state_listener(&self, replicaset: &str, listener: Arc<dyn ReplicasetStateListener>) -> bool {
        self.state.add(replicaset, listener)
    }

    /// Unregister a state listener; no-op if not registered
    pub fn remove_state_listener(
        &self,
        replicaset: &str,
        listener: &Arc<dyn ReplicasetStateListener>,
    ) -> bool {
        self.state.remove(replicaset, listener)
    }

    /// Register an acceptor update handler; no-op if already registered
    pub fn add_acceptor_handler(&self, replicaset: &str, handler: Arc<dyn AcceptorUpdateHandler>) -> bool {
        self.acceptors.add(replicaset, handler)
    }

    /// Unregister an acceptor update handler; no-op if not registered
    pub fn remove_acceptor_handler(
        &self,
        replicaset: &str,
        handler: &Arc<dyn AcceptorUpdateHandler>,
    ) -> bool {
        self.acceptors.remove(replicaset, handler)
    }

    /// Number of state listeners for a replicaset
    #[must_use]
    pub fn state_listener_count(&self, replicaset: &str) -> usize {
        self.state.len(replicaset)
    }

    /// Number of acceptor update handlers for a replicaset
    #[must_use]
    pub fn acceptor_handler_count(&self, replicaset: &str) -> usize {
        self.acceptors.len(replicaset)
    }

    /// Notify every state listener of one replicaset; returns how many ran
    pub fn notify_instances_changed(
        &self,
        replicaset: &str,
        instances: &LookupResult,
        md_servers_reachable: bool,
        view_id: u64,
    ) -> usize {
        let listeners = self.state.copy_of(replicaset);
        for listener in &listeners {
            listener.notify_instances_changed(instances, md_servers_reachable, view_id);
        }
        if !listeners.is_empty() {
            debug!(
                replicaset,
                listeners = listeners.len(),
                instances = instances.len(),
                "notified state listeners"
            );
        }
        listeners.len()
    }

    /// Ask every acceptor handler to update against `snapshot`
    ///
    /// Returns `true` if all handlers succeeded.
    pub fn update_socket_acceptors(&self, snapshot: &TopologySnapshot) -> bool {
        let mut all_ok = true;
        for replicaset in self.acceptors.names() {
            let instances = snapshot.lookup(&replicaset);
            for handler in self.acceptors.copy_of(&replicaset) {
                if !handler.update_socket_acceptor_state(&instances) {
                    debug!(replicaset = %replicaset, "acceptor update deferred to next refresh");
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}
