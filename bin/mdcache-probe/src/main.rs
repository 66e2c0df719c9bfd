//! Metadata cache probe
//!
//! Runs a metadata cache against file-backed metadata servers and logs
//! topology changes of the watched replicasets until interrupted.

mod file_source;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use file_source::{FileAuthSource, FileMetadataReader};
use mdcache_common::LookupResult;
use mdcache_core::{Collaborators, MetadataCacheApi, ReplicasetStateListener};
use settings::ProbeSettings;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mdcache-probe")]
#[command(about = "Metadata cache probe")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/mdcache/probe.toml")]
    config: String,

    /// Extra replicasets to watch
    #[arg(long)]
    watch: Vec<String>,

    /// Refresh TTL in milliseconds, overrides the configuration file
    #[arg(long)]
    ttl_ms: Option<u64>,

    /// Log level
    #[arg(long, env = "MDCACHE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Logs every topology change of one replicaset
struct LoggingListener {
    replicaset: String,
}

impl ReplicasetStateListener for LoggingListener {
    fn notify_instances_changed(
        &self,
        instances: &LookupResult,
        md_servers_reachable: bool,
        view_id: u64,
    ) {
        let primary = instances
            .iter()
            .find(|i| i.is_primary())
            .map_or_else(|| "none".to_string(), |i| i.address().to_string());
        info!(
            replicaset = %self.replicaset,
            members = instances.len(),
            primary = %primary,
            md_servers_reachable,
            view_id,
            "Topology changed"
        );
        for instance in instances.iter() {
            info!(
                "  {} {} ({}{})",
                instance.mysql_server_uuid,
                instance.address(),
                instance.mode,
                if instance.hidden { ", hidden" } else { "" }
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting metadata cache probe");

    let mut settings = ProbeSettings::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    if let Some(ttl_ms) = args.ttl_ms {
        settings.cache.ttl_ms = ttl_ms;
    }
    settings.watch.extend(args.watch);

    let mut collaborators =
        Collaborators::new(Arc::new(FileMetadataReader::new(&settings.topology_file)));
    if let Some(users_file) = &settings.users_file {
        collaborators = collaborators.with_rest_auth_source(Arc::new(FileAuthSource::new(users_file)));
    }

    let cache = MetadataCacheApi::new();
    cache.set_instance_name(settings.instance_name.clone());
    cache
        .cache_init(settings.cache.clone(), collaborators)
        .context("invalid metadata cache configuration")?;

    for replicaset in &settings.watch {
        cache.add_state_listener(
            replicaset,
            Arc::new(LoggingListener {
                replicaset: replicaset.clone(),
            }),
        )?;
        info!("Watching replicaset '{}'", replicaset);
    }
    if settings.users_file.is_some() {
        cache.enable_fetch_auth_metadata()?;
        info!("REST auth metadata refresh enabled");
    }

    cache.cache_start()?;
    info!(
        "Metadata cache running for cluster '{}' ({}), ttl {:?}",
        settings.cache.cluster_name,
        cache.cluster_type()?,
        cache.ttl()?
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    cache.cache_stop().await?;

    let status = cache.get_refresh_status()?;
    info!(
        refresh_succeeded = status.refresh_succeeded,
        refresh_failed = status.refresh_failed,
        "Final refresh status: {}",
        serde_json::to_string(&status)?
    );

    Ok(())
}
