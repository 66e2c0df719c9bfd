//! Cluster metadata cache
//!
//! Keeps an in-memory, periodically refreshed view of a replicated database
//! cluster's topology, fetched from a list of metadata servers, and serves
//! lookups without blocking on I/O. Consumers can subscribe to topology
//! changes, report unreachable instances (which switches the refresh to a
//! one-second emergency cadence), wait for a primary failover, and read
//! cached REST user authentication data.

pub mod api;
pub mod auth_cache;
pub mod cadence;
pub mod failover;
pub mod listener;
pub mod reachability;
pub mod reader;
pub mod scheduler;
pub mod snapshot;

#[cfg(test)]
mod test_support;

// Re-exports
pub use api::MetadataCacheApi;
pub use auth_cache::AuthCache;
pub use cadence::{EMERGENCY_REFRESH_INTERVAL, RefreshCadence};
pub use listener::{AcceptorUpdateHandler, ListenerRegistry, ReplicasetStateListener};
pub use reader::{FetchRequest, MetadataReader, RestAuthSource};
pub use scheduler::{Collaborators, RefreshScheduler, SchedulerState};
pub use snapshot::{RoleStatusPolicy, StatusPolicy, TopologySnapshot};
