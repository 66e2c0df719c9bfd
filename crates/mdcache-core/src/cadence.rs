//! Refresh cadence: normal and emergency mode
//!
//! Normally the topology is refreshed once per TTL. When the routing layer
//! reports a serving instance as broken the cadence switches to emergency
//! mode and refreshes every second until a refresh shows every flagged
//! instance gone from the topology or reachable again.

use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::reachability::ReachabilityTracker;
use crate::snapshot::TopologySnapshot;

/// Refresh interval while emergency mode is engaged
pub const EMERGENCY_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Two-state cadence sub-machine of the refresh scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RefreshCadence {
    #[default]
    Normal,
    /// Fast refresh until every flagged instance is resolved
    Emergency { flagged: BTreeSet<String> },
}

impl RefreshCadence {
    /// Check if emergency mode is engaged
    #[must_use]
    pub const fn is_emergency(&self) -> bool {
        matches!(self, Self::Emergency { .. })
    }

    /// Instances that keep emergency mode engaged
    pub fn flagged(&self) -> impl Iterator<Item = &str> {
        let flagged = match self {
            Self::Normal => None,
            Self::Emergency { flagged } => Some(flagged),
        };
        flagged.into_iter().flatten().map(String::as_str)
    }

    /// Flag an instance; returns `true` on the switch from normal to emergency
    pub fn engage(&mut self, uuid: &str) -> bool {
        match self {
            Self::Normal => {
                *self = Self::Emergency {
                    flagged: BTreeSet::from([uuid.to_string()]),
                };
                true
            }
            Self::Emergency { flagged } => {
                flagged.insert(uuid.to_string());
                false
            }
        }
    }

    /// Resolve flagged instances against a freshly published snapshot
    ///
    /// An instance is resolved once it is gone from `snapshot` or its latest
    /// hint is `Reachable`. Returns `true` when this leaves emergency mode.
    pub fn reconcile(&mut self, snapshot: &TopologySnapshot, tracker: &ReachabilityTracker) -> bool {
        let Self::Emergency { flagged } = self else {
            return false;
        };

        flagged.retain(|uuid| snapshot.find_instance(uuid).is_some() && !tracker.is_reachable(uuid));

        if flagged.is_empty() {
            *self = Self::Normal;
            true
        } else {
            false
        }
    }

    /// When the refresh loop should wake next
    ///
    /// `regular_deadline` is the TTL-based deadline, `last_pass` the start of
    /// the last refresh pass of any kind.
    #[must_use]
    pub fn next_wake(&self, regular_deadline: Instant, last_pass: Option<Instant>) -> Instant {
        match (self, last_pass) {
            (Self::Emergency { .. }, Some(last)) => {
                regular_deadline.min(last + EMERGENCY_REFRESH_INTERVAL)
            }
            _ => regular_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_common::{
        ClusterType, InstanceStatus, ManagedInstance, ManagedReplicaSet, ServerMode, TcpAddress,
    };

    fn snapshot(members: &[(&str, ServerMode)]) -> TopologySnapshot {
        let members = members
            .iter()
            .map(|(uuid, mode)| ManagedInstance::new("rs", *uuid, *mode, "h", 3306, 0))
            .collect();
        TopologySnapshot::build(
            vec![ManagedReplicaSet::new("rs", members)],
            &TopologySnapshot::empty(),
            ClusterType::GroupReplication,
            0,
            TcpAddress::new("md", 1),
        )
        .unwrap()
    }

    #[test]
    fn test_engage_transitions_once() {
        let mut cadence = RefreshCadence::default();
        assert!(!cadence.is_emergency());

        assert!(cadence.engage("a"));
        assert!(cadence.is_emergency());
        assert!(!cadence.engage("b"));
        assert_eq!(cadence.flagged().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_reconcile_keeps_emergency_while_instance_serving() {
        let tracker = ReachabilityTracker::new();
        let mut cadence = RefreshCadence::default();
        cadence.engage("a");
        tracker.mark("a", InstanceStatus::Unreachable);

        let snap = snapshot(&[("a", ServerMode::ReadWrite), ("b", ServerMode::ReadOnly)]);
        assert!(!cadence.reconcile(&snap, &tracker));
        assert!(cadence.is_emergency());
    }

    #[test]
    fn test_reconcile_clears_when_instance_removed() {
        let tracker = ReachabilityTracker::new();
        let mut cadence = RefreshCadence::default();
        cadence.engage("a");

        let snap = snapshot(&[("b", ServerMode::ReadWrite)]);
        assert!(cadence.reconcile(&snap, &tracker));
        assert_eq!(cadence, RefreshCadence::Normal);
    }

    #[test]
    fn test_reconcile_keeps_emergency_while_instance_listed_unavailable() {
        let tracker = ReachabilityTracker::new();
        let mut cadence = RefreshCadence::default();
        cadence.engage("a");
        tracker.mark("a", InstanceStatus::Unreachable);

        let snap = snapshot(&[("a", ServerMode::Unavailable), ("b", ServerMode::ReadWrite)]);
        assert!(!cadence.reconcile(&snap, &tracker));
        assert_eq!(cadence.flagged().collect::<Vec<_>>(), vec!["a"]);

        let snap = snapshot(&[("b", ServerMode::ReadWrite)]);
        assert!(cadence.reconcile(&snap, &tracker));
    }

    #[test]
    fn test_reconcile_clears_when_reachable_again() {
        let tracker = ReachabilityTracker::new();
        let mut cadence = RefreshCadence::default();
        cadence.engage("a");
        cadence.engage("b");
        tracker.mark("a", InstanceStatus::Reachable);

        let snap = snapshot(&[("a", ServerMode::ReadWrite), ("b", ServerMode::ReadOnly)]);
        assert!(!cadence.reconcile(&snap, &tracker));
        assert_eq!(cadence.flagged().collect::<Vec<_>>(), vec!["b"]);

        tracker.mark("b", InstanceStatus::Reachable);
        assert!(cadence.reconcile(&snap, &tracker));
    }

    #[test]
    fn test_next_wake() {
        let now = Instant::now();
        let regular = now + Duration::from_secs(10);

        let normal = RefreshCadence::Normal;
        assert_eq!(normal.next_wake(regular, Some(now)), regular);

        let mut emergency = RefreshCadence::Normal;
        emergency.engage("a");
        assert_eq!(
            emergency.next_wake(regular, Some(now)),
            now + EMERGENCY_REFRESH_INTERVAL
        );
        // never later than the regular deadline
        let soon = now + Duration::from_millis(200);
        assert_eq!(emergency.next_wake(soon, Some(now)), soon);
        assert_eq!(emergency.next_wake(regular, None), regular);
    }
}
