//! Public façade of the metadata cache
//!
//! A [`MetadataCacheApi`] is an explicit value owned by the embedding
//! service. It is initialised once with a configuration and its
//! collaborators, then started and stopped. Every other operation fails
//! with [`Error::NotInitialized`] before `cache_init`.

use mdcache_common::{
    ClusterType, Error, InstanceStatus, LookupResult, MetadataCacheConfig, RefreshStatus,
    ReplicasetStatus, RestAuthData, Result,
};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::listener::{AcceptorUpdateHandler, ReplicasetStateListener};
use crate::scheduler::{Collaborators, RefreshScheduler};

/// Handle to one metadata cache
#[derive(Default)]
pub struct MetadataCacheApi {
    scheduler: OnceLock<Arc<RefreshScheduler>>,
    instance_name: RwLock<String>,
}

impl MetadataCacheApi {
    /// Create an uninitialised cache handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and create the cache
    ///
    /// May be called once; later calls fail with `AlreadyInitialized`.
    pub fn cache_init(
        &self,
        config: MetadataCacheConfig,
        collaborators: Collaborators,
    ) -> Result<()> {
        if self.scheduler.get().is_some() {
            return Err(Error::AlreadyInitialized);
        }
        config.validate()?;

        info!(
            cluster = %config.cluster_name,
            cluster_type = %config.cluster_type,
            servers = config.metadata_servers.len(),
            "initializing metadata cache"
        );
        self.scheduler
            .set(RefreshScheduler::new(config, collaborators))
            .map_err(|_| Error::AlreadyInitialized)
    }

    /// Check if `cache_init` succeeded
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.scheduler.get().is_some()
    }

    fn scheduler(&self) -> Result<&Arc<RefreshScheduler>> {
        self.scheduler.get().ok_or(Error::NotInitialized)
    }

    /// Start background refreshing
    pub fn cache_start(&self) -> Result<()> {
        self.scheduler()?.start()
    }

    /// Stop background refreshing and join its tasks
    pub async fn cache_stop(&self) -> Result<()> {
        self.scheduler()?.stop().await
    }

    /// Members of a replicaset; empty if unknown
    pub fn lookup_replicaset(&self, replicaset: &str) -> Result<LookupResult> {
        Ok(self.scheduler()?.snapshot().lookup(replicaset))
    }

    /// Availability of a replicaset; `Unavailable` if unknown
    pub fn replicaset_status(&self, replicaset: &str) -> Result<ReplicasetStatus> {
        let scheduler = self.scheduler()?;
        let snapshot = scheduler.snapshot();
        Ok(snapshot
            .replicaset(replicaset)
            .map_or(ReplicasetStatus::Unavailable, |rs| {
                scheduler.status_policy().replicaset_status(rs)
            }))
    }

    /// Report the reachability of an instance seen by a consumer
    pub fn mark_instance_reachability(&self, uuid: &str, status: InstanceStatus) -> Result<()> {
        self.scheduler()?.mark_instance_reachability(uuid, status);
        Ok(())
    }

    /// Last reachability reported for an instance
    pub fn instance_reachability(&self, uuid: &str) -> Result<Option<InstanceStatus>> {
        Ok(self.scheduler()?.reachability().status(uuid))
    }

    /// Wait until `replicaset` has a primary other than `old_primary`
    ///
    /// Returns `false` on timeout, on shutdown, or if the cache is not
    /// initialised.
    pub async fn wait_primary_failover(
        &self,
        replicaset: &str,
        old_primary: &str,
        timeout: Duration,
    ) -> bool {
        match self.scheduler() {
            Ok(scheduler) => {
                scheduler
                    .wait_primary_failover(replicaset, old_primary, timeout)
                    .await
            }
            Err(_) => false,
        }
    }

    /// Register a listener for topology changes of `replicaset`
    pub fn add_state_listener(
        &self,
        replicaset: &str,
        listener: Arc<dyn ReplicasetStateListener>,
    ) -> Result<()> {
        if self.scheduler()?.listeners().add_state_listener(replicaset, listener) {
            debug!(replicaset, "state listener added");
        }
        Ok(())
    }

    /// Unregister a state listener; no-op if not registered
    pub fn remove_state_listener(
        &self,
        replicaset: &str,
        listener: &Arc<dyn ReplicasetStateListener>,
    ) -> Result<()> {
        if self.scheduler()?.listeners().remove_state_listener(replicaset, listener) {
            debug!(replicaset, "state listener removed");
        }
        Ok(())
    }

    /// Register a socket acceptor handler for `replicaset`
    pub fn add_acceptor_handler_listener(
        &self,
        replicaset: &str,
        handler: Arc<dyn AcceptorUpdateHandler>,
    ) -> Result<()> {
        self.scheduler()?
            .listeners()
            .add_acceptor_handler(replicaset, handler);
        Ok(())
    }

    /// Unregister a socket acceptor handler; no-op if not registered
    pub fn remove_acceptor_handler_listener(
        &self,
        replicaset: &str,
        handler: &Arc<dyn AcceptorUpdateHandler>,
    ) -> Result<()> {
        self.scheduler()?
            .listeners()
            .remove_acceptor_handler(replicaset, handler);
        Ok(())
    }

    /// Cached auth data for a REST user
    ///
    /// `None` if the user is unknown or its entry has expired.
    pub fn get_rest_user_auth_data(&self, username: &str) -> Result<Option<RestAuthData>> {
        Ok(self.scheduler()?.auth_cache().get(username))
    }

    /// Start refreshing REST user auth data
    pub fn enable_fetch_auth_metadata(&self) -> Result<()> {
        self.scheduler()?.enable_fetch_auth_metadata()
    }

    /// Trigger one refresh pass as soon as possible
    pub fn force_cache_update(&self) -> Result<()> {
        self.scheduler()?.force_cache_update();
        Ok(())
    }

    /// Copy of the refresh counters and last metadata server used
    pub fn get_refresh_status(&self) -> Result<RefreshStatus> {
        Ok(self.scheduler()?.refresh_status())
    }

    /// Validate the TTL ordering of a configuration
    pub fn check_auth_metadata_timers(config: &MetadataCacheConfig) -> Result<()> {
        config.check_auth_metadata_timers()
    }

    /// Run the acceptor handlers after the next successful refresh
    pub fn handle_sockets_acceptors_on_md_refresh(&self) -> Result<()> {
        self.scheduler()?.handle_sockets_acceptors_on_md_refresh();
        Ok(())
    }

    /// Name of the router instance embedding this cache
    #[must_use]
    pub fn instance_name(&self) -> String {
        self.instance_name.read().clone()
    }

    /// Set the router instance name
    pub fn set_instance_name(&self, name: impl Into<String>) {
        *self.instance_name.write() = name.into();
    }

    /// Configured cluster type
    pub fn cluster_type(&self) -> Result<ClusterType> {
        Ok(self.scheduler()?.config().cluster_type)
    }

    /// Replication group name or cluster id the cache is bound to
    pub fn cluster_type_specific_id(&self) -> Result<String> {
        Ok(self.scheduler()?.config().cluster_type_specific_id.clone())
    }

    /// Configured cluster name
    pub fn cluster_name(&self) -> Result<String> {
        Ok(self.scheduler()?.config().cluster_name.clone())
    }

    /// Regular refresh interval
    pub fn ttl(&self) -> Result<Duration> {
        Ok(self.scheduler()?.config().ttl())
    }
}

impl Drop for MetadataCacheApi {
    fn drop(&mut self) {
        // background tasks hold the scheduler; make them exit
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.shutdown_token().cancel();
        }
    }
}
