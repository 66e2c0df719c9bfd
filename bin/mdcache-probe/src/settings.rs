//! Probe configuration
//!
//! Loaded from a TOML file, then overridden by `MDCACHE_` environment
//! variables (`MDCACHE_CACHE__TTL_MS=1000` sets `cache.ttl_ms`).

use mdcache_common::MetadataCacheConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Settings of one probe run
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    /// Name reported as the router instance name
    #[serde(default)]
    pub instance_name: String,
    /// Metadata cache configuration
    #[serde(default)]
    pub cache: MetadataCacheConfig,
    /// JSON file mapping metadata servers to the replicasets they report
    pub topology_file: PathBuf,
    /// JSON file with REST users; auth fetching is enabled when set
    #[serde(default)]
    pub users_file: Option<PathBuf>,
    /// Replicasets to log topology changes for
    #[serde(default)]
    pub watch: Vec<String>,
}

impl ProbeSettings {
    /// Load settings from `path` and the environment
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("MDCACHE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
