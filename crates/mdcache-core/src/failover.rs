//! Waiting for a primary failover
//!
//! A [`FailoverWaiter`] registers interest in published snapshots and is
//! woken on every successful refresh, on its own timeout, or when the
//! cache shuts down.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::snapshot::TopologySnapshot;

/// A pending wait for a new primary
pub struct FailoverWaiter {
    snapshots: watch::Receiver<Arc<TopologySnapshot>>,
    shutdown: CancellationToken,
}

impl FailoverWaiter {
    /// Create a waiter on a snapshot channel
    #[must_use]
    pub const fn new(
        snapshots: watch::Receiver<Arc<TopologySnapshot>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            snapshots,
            shutdown,
        }
    }

    /// Wait until `replicaset` has a primary other than `old_primary`
    ///
    /// Returns `true` as soon as a published snapshot shows such a primary,
    /// `false` on timeout or shutdown. A timeout too large to be represented
    /// as a deadline waits without one.
    pub async fn wait(mut self, replicaset: &str, old_primary: &str, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);

        if has_new_primary(&self.snapshots.borrow_and_update(), replicaset, old_primary) {
            return true;
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!(replicaset, "failover wait interrupted by shutdown");
                    return false;
                }
                () = sleep_until_deadline(deadline) => {
                    debug!(replicaset, old_primary, "failover wait timed out");
                    return false;
                }
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if has_new_primary(&self.snapshots.borrow_and_update(), replicaset, old_primary) {
                        return true;
                    }
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn has_new_primary(snapshot: &TopologySnapshot, replicaset: &str, old_primary: &str) -> bool {
    snapshot
        .primary_of(replicaset)
        .is_some_and(|p| p.mysql_server_uuid != old_primary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_common::{ClusterType, ManagedInstance, ManagedReplicaSet, ServerMode, TcpAddress};

    fn with_primary(prior: &TopologySnapshot, primary: &str) -> Arc<TopologySnapshot> {
        let members = ["p1", "p2"]
            .iter()
            .map(|uuid| {
                let mode = if *uuid == primary {
                    ServerMode::ReadWrite
                } else {
                    ServerMode::ReadOnly
                };
                ManagedInstance::new("rs", *uuid, mode, "h", 3306, 0)
            })
            .collect();
        Arc::new(
            TopologySnapshot::build(
                vec![ManagedReplicaSet::new("rs", members)],
                prior,
                ClusterType::GroupReplication,
                0,
                TcpAddress::new("md", 1),
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let initial = with_primary(&TopologySnapshot::empty(), "p1");
        let (_tx, rx) = watch::channel(initial);
        let waiter = FailoverWaiter::new(rx, CancellationToken::new());

        let start = Instant::now();
        assert!(!waiter.wait("rs", "p1", Duration::from_secs(5)).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_new_primary() {
        let initial = with_primary(&TopologySnapshot::empty(), "p1");
        let (tx, rx) = watch::channel(Arc::clone(&initial));
        let waiter = FailoverWaiter::new(rx, CancellationToken::new());

        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            // same primary: the waiter keeps waiting
            let same = with_primary(&initial, "p1");
            tx.send_replace(Arc::clone(&same));
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send_replace(with_primary(&same, "p2"));
            tx
        });

        let start = Instant::now();
        assert!(waiter.wait("rs", "p1", Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
        drop(publisher.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_with_unbounded_timeout() {
        let initial = with_primary(&TopologySnapshot::empty(), "p1");
        let (tx, rx) = watch::channel(Arc::clone(&initial));
        let waiter = FailoverWaiter::new(rx, CancellationToken::new());

        let handle = tokio::spawn(async move { waiter.wait("rs", "p1", Duration::MAX).await });
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!handle.is_finished());

        tx.send_replace(with_primary(&initial, "p2"));
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_if_already_failed_over() {
        let initial = with_primary(&TopologySnapshot::empty(), "p2");
        let (_tx, rx) = watch::channel(initial);
        let waiter = FailoverWaiter::new(rx, CancellationToken::new());
        assert!(waiter.wait("rs", "p1", Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn test_wait_interrupted_by_shutdown() {
        let initial = with_primary(&TopologySnapshot::empty(), "p1");
        let (_tx, rx) = watch::channel(initial);
        let shutdown = CancellationToken::new();
        let waiter = FailoverWaiter::new(rx, shutdown.clone());

        let handle = tokio::spawn(async move { waiter.wait("rs", "p1", Duration::from_secs(3600)).await });
        shutdown.cancel();
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_unknown_replicaset_and_closed_channel() {
        let (tx, rx) = watch::channel(Arc::new(TopologySnapshot::empty()));
        let waiter = FailoverWaiter::new(rx, CancellationToken::new());
        drop(tx);
        assert!(!waiter.wait("missing", "p1", Duration::from_secs(3600)).await);
    }
}
