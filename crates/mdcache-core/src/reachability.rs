//! Advisory reachability hints reported by the routing layer

use mdcache_common::InstanceStatus;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::snapshot::TopologySnapshot;

/// Latest reachability hint per server uuid
#[derive(Debug, Default)]
pub struct ReachabilityTracker {
    hints: Mutex<HashMap<String, InstanceStatus>>,
}

impl ReachabilityTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hint; returns the previous one
    pub fn mark(&self, uuid: &str, status: InstanceStatus) -> Option<InstanceStatus> {
        self.hints.lock().insert(uuid.to_string(), status)
    }

    /// Latest hint for an instance
    #[must_use]
    pub fn status(&self, uuid: &str) -> Option<InstanceStatus> {
        self.hints.lock().get(uuid).copied()
    }

    /// Check if the latest hint says the instance is reachable again
    #[must_use]
    pub fn is_reachable(&self, uuid: &str) -> bool {
        self.status(uuid) == Some(InstanceStatus::Reachable)
    }

    /// Drop hints for instances that left the topology
    pub fn retain_known(&self, snapshot: &TopologySnapshot) {
        self.hints
            .lock()
            .retain(|uuid, _| snapshot.find_instance(uuid).is_some());
    }

    /// Number of tracked instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.hints.lock().len()
    }

    /// Check if no hints are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hints.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_common::{ClusterType, ManagedInstance, ManagedReplicaSet, ServerMode, TcpAddress};

    #[test]
    fn test_mark_and_read() {
        let tracker = ReachabilityTracker::new();
        assert!(tracker.status("a").is_none());

        assert_eq!(tracker.mark("a", InstanceStatus::Unreachable), None);
        assert_eq!(tracker.status("a"), Some(InstanceStatus::Unreachable));
        assert!(!tracker.is_reachable("a"));

        assert_eq!(
            tracker.mark("a", InstanceStatus::Reachable),
            Some(InstanceStatus::Unreachable)
        );
        assert!(tracker.is_reachable("a"));
    }

    #[test]
    fn test_retain_known() {
        let tracker = ReachabilityTracker::new();
        tracker.mark("a", InstanceStatus::Unusable);
        tracker.mark("gone", InstanceStatus::InvalidHost);

        let snapshot = TopologySnapshot::build(
            vec![ManagedReplicaSet::new(
                "rs",
                vec![ManagedInstance::new("rs", "a", ServerMode::ReadWrite, "h", 3306, 0)],
            )],
            &TopologySnapshot::empty(),
            ClusterType::GroupReplication,
            0,
            TcpAddress::new("md", 1),
        )
        .unwrap();

        tracker.retain_known(&snapshot);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.status("gone").is_none());
    }
}
