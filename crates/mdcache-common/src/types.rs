//! Core type definitions for the metadata cache
//!
//! This module defines the cluster data model: instances, replicasets,
//! addresses, credentials and the status values exchanged with the
//! routing layer.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default value of the hidden tag
pub const NODE_TAG_HIDDEN_DEFAULT: bool = false;
/// Default value of the disconnect-when-hidden tag
pub const NODE_TAG_DISCONNECT_WHEN_HIDDEN_DEFAULT: bool = true;

/// Kind of cluster the cache represents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterType {
    /// Group replication cluster (InnoDB Cluster style)
    #[default]
    #[display("group-replication")]
    GroupReplication,
    /// Asynchronous replication set
    #[display("replica-set")]
    ReplicaSet,
}

/// Role of a server in its replicaset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMode {
    #[display("read-write")]
    ReadWrite,
    #[display("read-only")]
    ReadOnly,
    #[display("unavailable")]
    Unavailable,
}

/// Externally observed reachability of an instance
///
/// This is a hint supplied by callers, never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Reachable,
    /// Network connection cannot even be attempted (bad address)
    InvalidHost,
    /// TCP connection cannot be opened
    Unreachable,
    /// TCP connection opens but a session can't be established
    Unusable,
}

impl InstanceStatus {
    /// Check if the status reports a problem with the instance
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Reachable)
    }
}

/// Availability of a replicaset as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicasetStatus {
    AvailableWritable,
    AvailableReadOnly,
    UnavailableRecovering,
    Unavailable,
}

/// Host and port of a server
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TcpAddress {
    pub host: String,
    pub port: u16,
}

impl TcpAddress {
    /// Create a new address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for TcpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TcpAddress({self})")
    }
}

/// Errors that can occur when parsing an address
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TcpAddressError {
    #[error("address is empty")]
    Empty,
    #[error("address is missing a port: {0}")]
    MissingPort(String),
    #[error("invalid port in address: {0}")]
    InvalidPort(String),
}

impl FromStr for TcpAddress {
    type Err = TcpAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TcpAddressError::Empty);
        }

        // [v6-address]:port
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| TcpAddressError::MissingPort(s.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| TcpAddressError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            s.rsplit_once(':')
                .ok_or_else(|| TcpAddressError::MissingPort(s.to_string()))?
        };

        if host.is_empty() {
            return Err(TcpAddressError::Empty);
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| TcpAddressError::InvalidPort(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for TcpAddress {
    type Error = TcpAddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TcpAddress> for String {
    fn from(addr: TcpAddress) -> Self {
        addr.to_string()
    }
}

const fn default_hidden() -> bool {
    NODE_TAG_HIDDEN_DEFAULT
}

const fn default_disconnect_when_hidden() -> bool {
    NODE_TAG_DISCONNECT_WHEN_HIDDEN_DEFAULT
}

const fn default_single_primary() -> bool {
    true
}

/// A server managed by the topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedInstance {
    /// Name of the replicaset the server belongs to
    #[serde(default)]
    pub replicaset_name: String,
    /// Unique id of the server, unique within its replicaset
    pub mysql_server_uuid: String,
    /// Role of the server
    pub mode: ServerMode,
    /// Host the server runs on
    pub host: String,
    /// Classic protocol port
    pub port: u16,
    /// X protocol port
    pub xport: u16,
    /// Hide the node from applications
    #[serde(default = "default_hidden")]
    pub hidden: bool,
    /// Disconnect existing sessions when the node is hidden
    #[serde(default = "default_disconnect_when_hidden")]
    pub disconnect_existing_sessions_when_hidden: bool,
}

impl ManagedInstance {
    /// Create an instance with default node tags
    pub fn new(
        replicaset_name: impl Into<String>,
        mysql_server_uuid: impl Into<String>,
        mode: ServerMode,
        host: impl Into<String>,
        port: u16,
        xport: u16,
    ) -> Self {
        Self {
            replicaset_name: replicaset_name.into(),
            mysql_server_uuid: mysql_server_uuid.into(),
            mode,
            host: host.into(),
            port,
            xport,
            hidden: NODE_TAG_HIDDEN_DEFAULT,
            disconnect_existing_sessions_when_hidden: NODE_TAG_DISCONNECT_WHEN_HIDDEN_DEFAULT,
        }
    }

    /// Classic protocol address of the instance
    #[must_use]
    pub fn address(&self) -> TcpAddress {
        TcpAddress::new(self.host.clone(), self.port)
    }

    /// Check if the instance is a writable primary
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.mode == ServerMode::ReadWrite
    }

    /// Check if the instance currently accepts traffic
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.mode != ServerMode::Unavailable
    }
}

impl From<&ManagedInstance> for TcpAddress {
    fn from(instance: &ManagedInstance) -> Self {
        instance.address()
    }
}

/// A replicaset: a group replication group or an async replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedReplicaSet {
    /// Name of the replicaset, unique within the cache
    pub name: String,
    /// Members in the order reported by the metadata source
    pub members: Vec<ManagedInstance>,
    /// Whether the replicaset runs in single-primary mode
    #[serde(default = "default_single_primary")]
    pub single_primary_mode: bool,
    /// Id of the metadata view (replica-set clusters only)
    #[serde(default)]
    pub view_id: u64,
    /// Replication engine and catalog disagree about the membership
    #[serde(default)]
    pub md_discrepancy: bool,
}

impl ManagedReplicaSet {
    /// Create a single-primary replicaset
    pub fn new(name: impl Into<String>, members: Vec<ManagedInstance>) -> Self {
        Self {
            name: name.into(),
            members,
            single_primary_mode: true,
            view_id: 0,
            md_discrepancy: false,
        }
    }

    /// The single writable member, if there is exactly one
    #[must_use]
    pub fn primary(&self) -> Option<&ManagedInstance> {
        let mut writable = self.members.iter().filter(|m| m.is_primary());
        match (writable.next(), writable.next()) {
            (Some(primary), None) => Some(primary),
            _ => None,
        }
    }

    /// Find a member by server uuid
    #[must_use]
    pub fn member(&self, uuid: &str) -> Option<&ManagedInstance> {
        self.members.iter().find(|m| m.mysql_server_uuid == uuid)
    }
}

/// Result of looking up a replicaset in the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupResult {
    /// Members in metadata order
    pub instances: Vec<ManagedInstance>,
}

impl LookupResult {
    /// Create a lookup result
    #[must_use]
    pub const fn new(instances: Vec<ManagedInstance>) -> Self {
        Self { instances }
    }

    /// Check if the lookup found nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Iterate over instances
    pub fn iter(&self) -> impl Iterator<Item = &ManagedInstance> {
        self.instances.iter()
    }
}

/// Credentials used to query the metadata servers
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// TLS mode used towards the metadata servers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    Disabled,
    #[default]
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

/// TLS options handed through to the metadata reader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslOptions {
    pub mode: SslMode,
    pub tls_version: Option<String>,
    pub cipher: Option<String>,
    pub ca: Option<String>,
    pub capath: Option<String>,
    pub crl: Option<String>,
    pub crlpath: Option<String>,
}

/// Counters describing the refresh history of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStatus {
    pub refresh_failed: u64,
    pub refresh_succeeded: u64,
    pub last_refresh_succeeded: Option<DateTime<Utc>>,
    pub last_refresh_failed: Option<DateTime<Utc>>,
    /// Host of the metadata server last successfully contacted
    pub last_metadata_server_host: String,
    /// Port of the metadata server last successfully contacted
    pub last_metadata_server_port: u16,
}

/// Authentication data of a REST user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestAuthData {
    /// Password hash as stored in the metadata
    pub password_hash: String,
    /// Privilege document
    #[serde(default)]
    pub privileges: serde_json::Value,
}
