//! Immutable topology snapshots
//!
//! A [`TopologySnapshot`] is built from what a metadata server reported,
//! validated against the previously published snapshot, and then swapped
//! in as a whole. Readers hold an `Arc` to the snapshot they looked at, so
//! they never see a half-updated replicaset.

use mdcache_common::{
    ClusterType, Error, LookupResult, ManagedInstance, ManagedReplicaSet, ReplicasetStatus,
    Result, ServerMode, TcpAddress,
};
use std::collections::{BTreeMap, HashSet};

/// Cluster topology as published by one successful refresh
#[derive(Clone, Debug, Default)]
pub struct TopologySnapshot {
    /// Publish counter (0 for the initial empty snapshot)
    generation: u64,
    /// Metadata server the data came from
    source: Option<TcpAddress>,
    /// Replicasets by name
    replicasets: BTreeMap<String, ManagedReplicaSet>,
}

impl TopologySnapshot {
    /// Create the empty snapshot served before the first refresh
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate fetched replicasets and build the snapshot that follows `prior`
    ///
    /// `view_id_floor` is the last view id known from configuration; it only
    /// applies to replicasets `prior` has never seen.
    pub fn build(
        fetched: Vec<ManagedReplicaSet>,
        prior: &Self,
        cluster_type: ClusterType,
        view_id_floor: u64,
        source: TcpAddress,
    ) -> Result<Self> {
        let mut replicasets = BTreeMap::new();

        for mut rs in fetched {
            validate_members(&mut rs)?;

            if cluster_type == ClusterType::ReplicaSet {
                let floor = prior
                    .replicasets
                    .get(&rs.name)
                    .map_or(view_id_floor, |known| known.view_id);
                if rs.view_id < floor {
                    return Err(Error::metadata(format!(
                        "view id of replicaset '{}' went backwards: {} < {}",
                        rs.name, rs.view_id, floor
                    )));
                }
            }

            if replicasets.contains_key(&rs.name) {
                return Err(Error::metadata(format!(
                    "replicaset '{}' reported more than once",
                    rs.name
                )));
            }
            replicasets.insert(rs.name.clone(), rs);
        }

        Ok(Self {
            generation: prior.generation + 1,
            source: Some(source),
            replicasets,
        })
    }

    /// Publish counter of this snapshot
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Metadata server this snapshot was fetched from
    #[must_use]
    pub const fn source(&self) -> Option<&TcpAddress> {
        self.source.as_ref()
    }

    /// Get a replicaset by name
    #[must_use]
    pub fn replicaset(&self, name: &str) -> Option<&ManagedReplicaSet> {
        self.replicasets.get(name)
    }

    /// All replicasets, ordered by name
    pub fn replicasets(&self) -> impl Iterator<Item = &ManagedReplicaSet> {
        self.replicasets.values()
    }

    /// Members of a replicaset; empty if the name is unknown
    #[must_use]
    pub fn lookup(&self, name: &str) -> LookupResult {
        self.replicasets
            .get(name)
            .map(|rs| LookupResult::new(rs.members.clone()))
            .unwrap_or_default()
    }

    /// Find an instance by server uuid in any replicaset
    #[must_use]
    pub fn find_instance(&self, uuid: &str) -> Option<&ManagedInstance> {
        self.replicasets.values().find_map(|rs| rs.member(uuid))
    }

    /// Check if the instance is part of the topology and takes traffic
    #[must_use]
    pub fn is_serving(&self, uuid: &str) -> bool {
        self.find_instance(uuid).is_some_and(ManagedInstance::is_serving)
    }

    /// Primary of a replicaset
    #[must_use]
    pub fn primary_of(&self, name: &str) -> Option<&ManagedInstance> {
        self.replicasets.get(name).and_then(ManagedReplicaSet::primary)
    }

    /// Names of replicasets whose membership, roles or node tags differ from `prior`
    ///
    /// Replicasets that appeared or disappeared count as changed.
    #[must_use]
    pub fn changed_replicasets(&self, prior: &Self) -> Vec<String> {
        let mut names: Vec<&String> = self.replicasets.keys().collect();
        names.extend(
            prior
                .replicasets
                .keys()
                .filter(|n| !self.replicasets.contains_key(*n)),
        );
        names.sort();

        names
            .into_iter()
            .filter(|name| {
                match (self.replicasets.get(*name), prior.replicasets.get(*name)) {
                    (Some(now), Some(before)) => member_keys(now) != member_keys(before),
                    _ => true,
                }
            })
            .cloned()
            .collect()
    }
}

/// Check per-replicaset invariants and stamp missing replicaset names
fn validate_members(rs: &mut ManagedReplicaSet) -> Result<()> {
    let mut seen = HashSet::with_capacity(rs.members.len());
    let mut writable = 0usize;

    for member in &mut rs.members {
        if member.replicaset_name.is_empty() {
            member.replicaset_name.clone_from(&rs.name);
        } else if member.replicaset_name != rs.name {
            return Err(Error::metadata(format!(
                "instance '{}' reported in replicaset '{}' but claims '{}'",
                member.mysql_server_uuid, rs.name, member.replicaset_name
            )));
        }

        if !seen.insert(member.mysql_server_uuid.clone()) {
            return Err(Error::metadata(format!(
                "duplicate instance '{}' in replicaset '{}'",
                member.mysql_server_uuid, rs.name
            )));
        }

        if member.mode == ServerMode::ReadWrite {
            writable += 1;
        }
    }

    if rs.single_primary_mode && writable > 1 {
        return Err(Error::metadata(format!(
            "replicaset '{}' is single-primary but reports {} writable members",
            rs.name, writable
        )));
    }

    Ok(())
}

type MemberKey<'a> = (&'a str, &'a str, u16, u16, ServerMode, bool, bool);

fn member_keys(rs: &ManagedReplicaSet) -> Vec<MemberKey<'_>> {
    let mut keys: Vec<MemberKey<'_>> = rs
        .members
        .iter()
        .map(|m| {
            (
                m.mysql_server_uuid.as_str(),
                m.host.as_str(),
                m.port,
                m.xport,
                m.mode,
                m.hidden,
                m.disconnect_existing_sessions_when_hidden,
            )
        })
        .collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    keys
}

/// Policy deciding the availability of a replicaset
///
/// The quorum rules differ per cluster type, so the computation is
/// pluggable.
pub trait StatusPolicy: Send + Sync {
    /// Compute the status of one replicaset
    fn replicaset_status(&self, rs: &ManagedReplicaSet) -> ReplicasetStatus;
}

/// Status derived from member roles alone
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleStatusPolicy;

impl StatusPolicy for RoleStatusPolicy {
    fn replicaset_status(&self, rs: &ManagedReplicaSet) -> ReplicasetStatus {
        if rs.members.iter().any(ManagedInstance::is_primary) {
            ReplicasetStatus::AvailableWritable
        } else if rs.members.iter().any(ManagedInstance::is_serving) {
            ReplicasetStatus::AvailableReadOnly
        } else if rs.md_discrepancy {
            ReplicasetStatus::UnavailableRecovering
        } else {
            ReplicasetStatus::Unavailable
        }
    }
}
