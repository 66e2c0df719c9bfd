//! Collaborator traits for the data sources behind the cache
//!
//! The cache never talks to a database itself. A [`MetadataReader`] fetches
//! the topology from one metadata server, a [`RestAuthSource`] fetches the
//! REST users. Both are async and pluggable.

use async_trait::async_trait;
use mdcache_common::{
    ClusterType, ManagedReplicaSet, MetadataCacheConfig, RestAuthData, Result, SslOptions,
    TcpAddress, UserCredentials,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

/// Everything a reader needs to query one metadata server
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub cluster_type: ClusterType,
    pub router_id: u32,
    /// Replication group name (GR) or cluster id (replica set)
    pub cluster_type_specific_id: String,
    pub cluster_name: String,
    pub credentials: UserCredentials,
    pub ssl: SslOptions,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Highest view id seen so far (replica-set clusters)
    pub view_id: u64,
}

impl FetchRequest {
    /// Build the request template from the cache configuration
    #[must_use]
    pub fn from_config(config: &MetadataCacheConfig) -> Self {
        Self {
            cluster_type: config.cluster_type,
            router_id: config.router_id,
            cluster_type_specific_id: config.cluster_type_specific_id.clone(),
            cluster_name: config.cluster_name.clone(),
            credentials: config.credentials.clone(),
            ssl: config.ssl.clone(),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            view_id: config.view_id,
        }
    }
}

/// Source of cluster topology
#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Fetch all replicasets from one metadata server
    ///
    /// Connection problems must be reported as `Error::Connection` or
    /// `Error::Timeout` so the next server gets tried; inconsistent content
    /// as `Error::Metadata`.
    async fn fetch(
        &self,
        server: &TcpAddress,
        request: &FetchRequest,
    ) -> Result<Vec<ManagedReplicaSet>>;

    /// Change signal pushed by the cluster, if the reader supports it
    ///
    /// Used as an extra refresh trigger when cluster notifications are
    /// enabled for a group replication cluster.
    fn cluster_notifications(&self) -> Option<watch::Receiver<u64>> {
        None
    }

    /// Reader name for logging
    fn name(&self) -> &str {
        "metadata-reader"
    }
}

/// Source of REST user authentication data
#[async_trait]
pub trait RestAuthSource: Send + Sync {
    /// Fetch every REST user with its password hash and privileges
    async fn fetch_rest_users(&self) -> Result<HashMap<String, RestAuthData>>;
}
