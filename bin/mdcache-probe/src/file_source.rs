//! File-backed metadata and REST auth sources
//!
//! The topology file is re-read on every fetch, so editing it while the
//! probe runs simulates membership changes and failovers.

use async_trait::async_trait;
use mdcache_common::{Error, ManagedReplicaSet, RestAuthData, Result, TcpAddress};
use mdcache_core::{FetchRequest, MetadataReader, RestAuthSource};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Metadata reader serving the topology file
///
/// The file maps metadata server addresses to the replicasets each one
/// reports. A server absent from the file is treated as unreachable.
pub struct FileMetadataReader {
    path: PathBuf,
}

impl FileMetadataReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetadataReader for FileMetadataReader {
    async fn fetch(
        &self,
        server: &TcpAddress,
        _request: &FetchRequest,
    ) -> Result<Vec<ManagedReplicaSet>> {
        let mut topology: HashMap<TcpAddress, Vec<ManagedReplicaSet>> =
            load_json(&self.path).await?;
        topology
            .remove(server)
            .ok_or_else(|| Error::connection(server, "server not listed in topology file"))
    }

    fn name(&self) -> &str {
        "topology-file"
    }
}

/// REST auth source serving the users file
pub struct FileAuthSource {
    path: PathBuf,
}

impl FileAuthSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RestAuthSource for FileAuthSource {
    async fn fetch_rest_users(&self) -> Result<HashMap<String, RestAuthData>> {
        load_json(&self.path).await
    }
}

async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::connection(path.display(), e.to_string()))?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::metadata(format!("invalid {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_common::MetadataCacheConfig;
    use tempfile::tempdir;

    const TOPOLOGY: &str = r#"{
        "10.0.0.1:32275": [
            {
                "name": "prod",
                "members": [
                    {"mysql_server_uuid": "p1", "mode": "read-write", "host": "db1", "port": 3306, "xport": 33060},
                    {"mysql_server_uuid": "s1", "mode": "read-only", "host": "db2", "port": 3306, "xport": 33060, "hidden": true}
                ]
            }
        ]
    }"#;

    fn request() -> FetchRequest {
        FetchRequest::from_config(&MetadataCacheConfig::default())
    }

    #[tokio::test]
    async fn test_reader_serves_listed_server() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, TOPOLOGY).unwrap();

        let reader = FileMetadataReader::new(&path);
        let replicasets = reader
            .fetch(&TcpAddress::new("10.0.0.1", 32275), &request())
            .await
            .unwrap();

        assert_eq!(replicasets.len(), 1);
        let rs = &replicasets[0];
        assert_eq!(rs.name, "prod");
        assert!(rs.single_primary_mode);
        assert_eq!(rs.primary().unwrap().mysql_server_uuid, "p1");
        assert!(rs.members[1].hidden);
    }

    #[tokio::test]
    async fn test_unlisted_server_is_unreachable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, TOPOLOGY).unwrap();

        let reader = FileMetadataReader::new(&path);
        let err = reader
            .fetch(&TcpAddress::new("10.0.0.2", 32275), &request())
            .await
            .unwrap_err();
        assert!(err.is_connection());

        let missing = FileMetadataReader::new(dir.path().join("absent.json"));
        let err = missing
            .fetch(&TcpAddress::new("10.0.0.1", 32275), &request())
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_malformed_topology_is_metadata_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, "{ not json").unwrap();

        let reader = FileMetadataReader::new(&path);
        let err = reader
            .fetch(&TcpAddress::new("10.0.0.1", 32275), &request())
            .await
            .unwrap_err();
        assert!(err.is_metadata());
    }

    #[tokio::test]
    async fn test_auth_source_reads_users() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(
            &path,
            r#"{"admin": {"password_hash": "$A$005$abc", "privileges": {"rest": ["read"]}}}"#,
        )
        .unwrap();

        let users = FileAuthSource::new(&path).fetch_rest_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users["admin"].password_hash, "$A$005$abc");
        assert_eq!(users["admin"].privileges["rest"][0], "read");
    }
}
