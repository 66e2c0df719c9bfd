//! Configuration types for the metadata cache
//!
//! This module defines the options accepted by `cache_init` together with
//! their defaults and the timer ordering checks.

use crate::error::{Error, Result};
use crate::types::{ClusterType, SslOptions, TcpAddress, UserCredentials};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default metadata server port
pub const DEFAULT_METADATA_PORT: u16 = 32275;
/// Default metadata server host
pub const DEFAULT_METADATA_HOST: &str = "127.0.0.1";
/// Default metadata TTL (milliseconds)
pub const DEFAULT_METADATA_TTL_MS: u64 = 500;
/// Default REST auth cache refresh interval (milliseconds)
pub const DEFAULT_AUTH_CACHE_REFRESH_INTERVAL_MS: u64 = 2000;
/// Default connect timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Default read timeout (seconds)
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
/// Default stack size hint for the refresh task (kilobytes)
pub const DEFAULT_THREAD_STACK_SIZE_KB: usize = 1024;

/// Options for a metadata cache instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataCacheConfig {
    /// Kind of cluster (group replication or replica set)
    pub cluster_type: ClusterType,
    /// Id of this router in the cluster metadata
    pub router_id: u32,
    /// Replication group name for GR, cluster id for replica sets
    pub cluster_type_specific_id: String,
    /// Metadata servers, tried in this order
    pub metadata_servers: Vec<TcpAddress>,
    /// Metadata user
    pub credentials: UserCredentials,
    /// Maximum staleness of the topology (milliseconds)
    pub ttl_ms: u64,
    /// TTL of REST auth data; `None` keeps entries forever
    pub auth_cache_ttl_ms: Option<u64>,
    /// Refresh rate of REST auth data (milliseconds)
    pub auth_cache_refresh_interval_ms: u64,
    /// TLS options towards the metadata servers
    pub ssl: SslOptions,
    /// Name of the cluster
    pub cluster_name: String,
    /// Connect timeout per metadata server (seconds)
    pub connect_timeout_secs: u64,
    /// Read timeout per metadata server (seconds)
    pub read_timeout_secs: u64,
    /// Stack size hint for the refresh task (kilobytes)
    pub thread_stack_size_kb: usize,
    /// Use cluster notifications as an extra refresh trigger (GR only)
    pub use_cluster_notifications: bool,
    /// Last known metadata view id (replica-set clusters)
    pub view_id: u64,
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            cluster_type: ClusterType::default(),
            router_id: 0,
            cluster_type_specific_id: String::new(),
            metadata_servers: vec![TcpAddress::new(
                DEFAULT_METADATA_HOST,
                DEFAULT_METADATA_PORT,
            )],
            credentials: UserCredentials::default(),
            ttl_ms: DEFAULT_METADATA_TTL_MS,
            auth_cache_ttl_ms: None,
            auth_cache_refresh_interval_ms: DEFAULT_AUTH_CACHE_REFRESH_INTERVAL_MS,
            ssl: SslOptions::default(),
            cluster_name: String::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            thread_stack_size_kb: DEFAULT_THREAD_STACK_SIZE_KB,
            use_cluster_notifications: false,
            view_id: 0,
        }
    }
}

impl MetadataCacheConfig {
    /// Topology TTL
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// REST auth data TTL, `None` if entries never expire
    #[must_use]
    pub fn auth_cache_ttl(&self) -> Option<Duration> {
        self.auth_cache_ttl_ms.map(Duration::from_millis)
    }

    /// REST auth data refresh interval
    #[must_use]
    pub const fn auth_cache_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.auth_cache_refresh_interval_ms)
    }

    /// Connect timeout per metadata server
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout per metadata server
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Upper bound for a single fetch attempt against one server
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs + self.read_timeout_secs)
    }

    /// Check the ordering of the three cache timers
    ///
    /// Fails when `auth_cache_ttl < ttl`, `auth_cache_refresh_interval < ttl`
    /// or `auth_cache_refresh_interval > auth_cache_ttl`.
    pub fn check_auth_metadata_timers(&self) -> Result<()> {
        let ttl = self.ttl();
        let refresh = self.auth_cache_refresh_interval();

        if let Some(auth_ttl) = self.auth_cache_ttl() {
            if auth_ttl < ttl {
                return Err(Error::configuration(format!(
                    "auth_cache_ttl ({} ms) must be greater than or equal to ttl ({} ms)",
                    auth_ttl.as_millis(),
                    ttl.as_millis()
                )));
            }
            if refresh > auth_ttl {
                return Err(Error::configuration(format!(
                    "auth_cache_refresh_interval ({} ms) must be less than or equal to auth_cache_ttl ({} ms)",
                    refresh.as_millis(),
                    auth_ttl.as_millis()
                )));
            }
        }

        if refresh < ttl {
            return Err(Error::configuration(format!(
                "auth_cache_refresh_interval ({} ms) must be greater than or equal to ttl ({} ms)",
                refresh.as_millis(),
                ttl.as_millis()
            )));
        }

        Ok(())
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.metadata_servers.is_empty() {
            return Err(Error::configuration("no metadata servers configured"));
        }
        if self.ttl_ms == 0 {
            return Err(Error::configuration("ttl must be greater than zero"));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(Error::configuration(
                "connect and read timeouts must be greater than zero",
            ));
        }
        self.check_auth_metadata_timers()
    }
}
