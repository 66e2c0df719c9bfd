//! Background refresh of the topology and REST auth caches
//!
//! The [`RefreshScheduler`] owns two tasks:
//! - the topology refresh loop: wakes on its cadence (TTL, or one second in
//!   emergency mode), on `force_cache_update`, or on a cluster notification;
//!   fetches from the metadata servers in order, publishes a new snapshot,
//!   and fans out to listeners
//! - the optional REST auth refresh loop, on its own interval
//!
//! Failed passes never stop a loop; the last good snapshot keeps being
//! served.

use chrono::Utc;
use mdcache_common::{
    ClusterType, Error, InstanceStatus, MetadataCacheConfig, RefreshStatus, Result, TcpAddress,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth_cache::AuthCache;
use crate::cadence::RefreshCadence;
use crate::failover::FailoverWaiter;
use crate::listener::ListenerRegistry;
use crate::reachability::ReachabilityTracker;
use crate::reader::{FetchRequest, MetadataReader, RestAuthSource};
use crate::snapshot::{RoleStatusPolicy, StatusPolicy, TopologySnapshot};

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Why a refresh pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Forced,
    ClusterNotification,
}

/// External collaborators of a cache instance
#[derive(Clone)]
pub struct Collaborators {
    /// Topology source
    pub metadata_reader: Arc<dyn MetadataReader>,
    /// REST user source, required for `enable_fetch_auth_metadata`
    pub rest_auth_source: Option<Arc<dyn RestAuthSource>>,
    /// Replicaset availability policy
    pub status_policy: Arc<dyn StatusPolicy>,
}

impl Collaborators {
    /// Collaborators with only a metadata reader
    pub fn new(metadata_reader: Arc<dyn MetadataReader>) -> Self {
        Self {
            metadata_reader,
            rest_auth_source: None,
            status_policy: Arc::new(RoleStatusPolicy),
        }
    }

    /// Set the REST auth source
    #[must_use]
    pub fn with_rest_auth_source(mut self, source: Arc<dyn RestAuthSource>) -> Self {
        self.rest_auth_source = Some(source);
        self
    }

    /// Set the replicaset status policy
    #[must_use]
    pub fn with_status_policy(mut self, policy: Arc<dyn StatusPolicy>) -> Self {
        self.status_policy = policy;
        self
    }
}

/// Refresh engine behind the metadata cache
pub struct RefreshScheduler {
    config: MetadataCacheConfig,
    collaborators: Collaborators,
    /// Published snapshot, swapped as a whole
    snapshots: watch::Sender<Arc<TopologySnapshot>>,
    listeners: ListenerRegistry,
    reachability: ReachabilityTracker,
    cadence: Mutex<RefreshCadence>,
    auth_cache: AuthCache,
    status: Mutex<RefreshStatus>,
    state: Mutex<SchedulerState>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    auth_task: Mutex<Option<JoinHandle<()>>>,
    auth_enabled: AtomicBool,
    /// Run acceptor handlers on the next successful refresh
    update_acceptors: AtomicBool,
    force_requested: AtomicBool,
    /// Wakes the refresh loop to re-evaluate its deadline
    wake: Notify,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    /// Create an idle scheduler
    pub fn new(config: MetadataCacheConfig, collaborators: Collaborators) -> Arc<Self> {
        let (snapshots, _) = watch::channel(Arc::new(TopologySnapshot::empty()));
        let auth_cache = AuthCache::new(config.auth_cache_ttl());
        Arc::new(Self {
            config,
            collaborators,
            snapshots,
            listeners: ListenerRegistry::new(),
            reachability: ReachabilityTracker::new(),
            cadence: Mutex::new(RefreshCadence::default()),
            auth_cache,
            status: Mutex::new(RefreshStatus::default()),
            state: Mutex::new(SchedulerState::Idle),
            refresh_task: Mutex::new(None),
            auth_task: Mutex::new(None),
            auth_enabled: AtomicBool::new(false),
            update_acceptors: AtomicBool::new(false),
            force_requested: AtomicBool::new(false),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Configuration the scheduler runs with
    #[must_use]
    pub const fn config(&self) -> &MetadataCacheConfig {
        &self.config
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Currently published snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Observer registries
    #[must_use]
    pub const fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Reachability hints
    #[must_use]
    pub const fn reachability(&self) -> &ReachabilityTracker {
        &self.reachability
    }

    /// REST auth cache
    #[must_use]
    pub const fn auth_cache(&self) -> &AuthCache {
        &self.auth_cache
    }

    /// Replicaset status policy
    #[must_use]
    pub fn status_policy(&self) -> &dyn StatusPolicy {
        self.collaborators.status_policy.as_ref()
    }

    /// Copy of the refresh counters
    #[must_use]
    pub fn refresh_status(&self) -> RefreshStatus {
        self.status.lock().clone()
    }

    /// Check if emergency cadence is engaged
    #[must_use]
    pub fn is_emergency(&self) -> bool {
        self.cadence.lock().is_emergency()
    }

    /// Token cancelled when the scheduler shuts down
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the refresh task (and the auth task if enabled)
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SchedulerState::Idle {
            return Err(Error::invalid_state(format!(
                "cannot start metadata cache in state {:?}",
                *state
            )));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::invalid_state(
                "metadata cache must be started from within a tokio runtime",
            ));
        }

        info!(
            cluster_type = %self.config.cluster_type,
            cluster = %self.config.cluster_name,
            servers = self.config.metadata_servers.len(),
            ttl_ms = self.config.ttl_ms,
            stack_size_kb = self.config.thread_stack_size_kb,
            "starting metadata cache refresh"
        );

        *self.refresh_task.lock() = Some(tokio::spawn(Arc::clone(self).refresh_loop()));
        if self.auth_enabled.load(Ordering::SeqCst) {
            self.spawn_auth_task()?;
        }

        *state = SchedulerState::Running;
        Ok(())
    }

    /// Stop and join all tasks; idempotent
    ///
    /// Pending failover waiters are woken with `false`. No listener is
    /// notified after this returns. Fails with `Error::Internal` if a
    /// background task panicked; the scheduler is stopped either way.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                SchedulerState::Stopping | SchedulerState::Stopped => return Ok(()),
                SchedulerState::Idle | SchedulerState::Running => {
                    *state = SchedulerState::Stopping;
                }
            }
        }

        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = [self.refresh_task.lock().take(), self.auth_task.lock().take()]
            .into_iter()
            .flatten()
            .collect();
        let mut failure = None;
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Metadata cache task failed during shutdown: {}", e);
                failure.get_or_insert_with(|| Error::internal(format!("metadata cache task failed: {e}")));
            }
        }

        *self.state.lock() = SchedulerState::Stopped;
        info!("metadata cache stopped");
        failure.map_or(Ok(()), Err)
    }

    /// Start refreshing REST auth data
    ///
    /// Takes effect immediately when running, otherwise on start.
    pub fn enable_fetch_auth_metadata(self: &Arc<Self>) -> Result<()> {
        if self.collaborators.rest_auth_source.is_none() {
            return Err(Error::configuration(
                "no REST auth source configured for this metadata cache",
            ));
        }
        if self.auth_enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let state = self.state.lock();
        if *state == SchedulerState::Running {
            self.spawn_auth_task()?;
        }
        drop(state);
        Ok(())
    }

    fn spawn_auth_task(self: &Arc<Self>) -> Result<()> {
        let source = self
            .collaborators
            .rest_auth_source
            .clone()
            .ok_or_else(|| Error::configuration("no REST auth source configured"))?;
        let mut task = self.auth_task.lock();
        if task.is_none() {
            *task = Some(tokio::spawn(Arc::clone(self).auth_refresh_loop(source)));
        }
        Ok(())
    }

    /// Run one refresh pass out of band
    pub fn force_cache_update(&self) {
        self.force_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Arm the acceptor handlers for the next successful refresh
    pub fn handle_sockets_acceptors_on_md_refresh(&self) {
        self.update_acceptors.store(true, Ordering::SeqCst);
    }

    /// Record a reachability hint; may engage emergency cadence
    pub fn mark_instance_reachability(&self, uuid: &str, status: InstanceStatus) {
        let previous = self.reachability.mark(uuid, status);
        if previous != Some(status) {
            debug!(instance = uuid, ?status, "instance reachability changed");
        }
        if !status.is_failure() {
            return;
        }

        if !self.snapshots.borrow().is_serving(uuid) {
            debug!(instance = uuid, "ignoring reachability of instance not serving traffic");
            return;
        }

        if self.cadence.lock().engage(uuid) {
            info!(
                instance = uuid,
                ?status,
                "instance reported unavailable, refreshing metadata every second"
            );
        }
        self.wake.notify_one();
    }

    /// Wait for `replicaset` to get a primary other than `old_primary`
    pub async fn wait_primary_failover(
        &self,
        replicaset: &str,
        old_primary: &str,
        timeout: Duration,
    ) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        FailoverWaiter::new(self.snapshots.subscribe(), self.shutdown.clone())
            .wait(replicaset, old_primary, timeout)
            .await
    }

    async fn refresh_loop(self: Arc<Self>) {
        let ttl = self.config.ttl();
        let mut notifications = if self.config.use_cluster_notifications
            && self.config.cluster_type == ClusterType::GroupReplication
        {
            self.collaborators.metadata_reader.cluster_notifications()
        } else {
            None
        };

        let mut regular_deadline = Instant::now();
        let mut last_pass: Option<Instant> = None;

        info!(reader = self.collaborators.metadata_reader.name(), "metadata refresh loop started");

        loop {
            let next_wake = self.cadence.lock().next_wake(regular_deadline, last_pass);

            let trigger = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {
                    if !self.force_requested.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    Trigger::Forced
                }
                () = next_cluster_notification(&mut notifications) => Trigger::ClusterNotification,
                () = tokio::time::sleep_until(next_wake) => Trigger::Scheduled,
            };

            let started = Instant::now();
            last_pass = Some(started);
            if trigger == Trigger::Scheduled {
                regular_deadline = started + ttl;
            }
            debug!(?trigger, emergency = self.is_emergency(), "metadata refresh pass");

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = self.refresh_once() => {}
            }
        }

        info!("metadata refresh loop stopped");
    }

    /// One refresh pass; returns `true` if a snapshot was published
    async fn refresh_once(&self) -> bool {
        let prior = self.snapshot();
        let mut request = FetchRequest::from_config(&self.config);
        request.view_id = prior
            .replicasets()
            .map(|rs| rs.view_id)
            .fold(self.config.view_id, u64::max);

        let mut fetched = None;
        for server in &self.config.metadata_servers {
            let attempt = tokio::time::timeout(
                self.config.attempt_timeout(),
                self.collaborators.metadata_reader.fetch(server, &request),
            )
            .await
            .unwrap_or(Err(Error::Timeout));

            match attempt {
                Ok(replicasets) => {
                    fetched = Some((server.clone(), replicasets));
                    break;
                }
                Err(e) if e.is_connection() => {
                    warn!(server = %server, error = %e, "metadata server unavailable");
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "metadata refresh abandoned");
                    self.record_failure();
                    return false;
                }
            }
        }

        let Some((server, replicasets)) = fetched else {
            warn!(
                servers = self.config.metadata_servers.len(),
                "no metadata server reachable, serving last known topology"
            );
            self.record_failure();
            return false;
        };

        let snapshot = match TopologySnapshot::build(
            replicasets,
            &prior,
            self.config.cluster_type,
            self.config.view_id,
            server.clone(),
        ) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(server = %server, error = %e, "metadata failed validation, serving last known topology");
                self.record_failure();
                return false;
            }
        };

        let changed = snapshot.changed_replicasets(&prior);
        self.snapshots.send_replace(Arc::clone(&snapshot));
        self.record_success(&server);

        self.reachability.retain_known(&snapshot);
        if self.cadence.lock().reconcile(&snapshot, &self.reachability) {
            info!("metadata refreshed, leaving emergency mode");
        }

        for name in &changed {
            let view_id = snapshot.replicaset(name).map_or(0, |rs| rs.view_id);
            let instances = snapshot.lookup(name);
            info!(
                replicaset = %name,
                members = instances.len(),
                view_id,
                "replicaset topology changed"
            );
            self.listeners
                .notify_instances_changed(name, &instances, true, view_id);
        }

        if self.update_acceptors.swap(false, Ordering::SeqCst)
            && !self.listeners.update_socket_acceptors(&snapshot)
        {
            self.update_acceptors.store(true, Ordering::SeqCst);
        }

        true
    }

    fn record_success(&self, server: &TcpAddress) {
        let mut status = self.status.lock();
        status.refresh_succeeded += 1;
        status.last_refresh_succeeded = Some(Utc::now());
        status.last_metadata_server_host.clone_from(&server.host);
        status.last_metadata_server_port = server.port;
    }

    fn record_failure(&self) {
        let mut status = self.status.lock();
        status.refresh_failed += 1;
        status.last_refresh_failed = Some(Utc::now());
    }

    async fn auth_refresh_loop(self: Arc<Self>, source: Arc<dyn RestAuthSource>) {
        let mut ticker = tokio::time::interval(self.config.auth_cache_refresh_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.auth_cache_refresh_interval_ms,
            "REST auth refresh loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                result = self.auth_cache.refresh(source.as_ref()) => {
                    if let Err(e) = result {
                        warn!(error = %e, "failed to refresh REST auth data");
                    }
                }
            }
        }

        info!("REST auth refresh loop stopped");
    }
}

/// Resolves on the next cluster change signal; pending forever without one
async fn next_cluster_notification(notifications: &mut Option<watch::Receiver<u64>>) {
    if let Some(rx) = notifications.as_mut() {
        if rx.changed().await.is_ok() {
            return;
        }
        *notifications = None;
    }
    std::future::pending::<()>().await;
}
