//! REST user authentication cache
//!
//! Holds username -> (password hash, privileges) as last fetched from the
//! REST auth source. Entries are served until `auth_cache_ttl` has elapsed
//! since the fetch that stamped them, then withheld until a newer fetch
//! succeeds.

use mdcache_common::{RestAuthData, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::reader::RestAuthSource;

/// One cached REST user
#[derive(Debug, Clone)]
pub struct AuthCacheEntry {
    pub username: String,
    pub data: RestAuthData,
    /// When the fetch that produced this entry completed
    pub fetched_at: Instant,
}

/// TTL'd cache of REST user authentication data
#[derive(Debug)]
pub struct AuthCache {
    entries: RwLock<HashMap<String, AuthCacheEntry>>,
    /// `None` keeps entries forever
    ttl: Option<Duration>,
}

impl AuthCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Authentication data for a user, if present and not expired
    #[must_use]
    pub fn get(&self, username: &str) -> Option<RestAuthData> {
        let entries = self.entries.read();
        let entry = entries.get(username)?;
        if self.is_expired(entry, Instant::now()) {
            return None;
        }
        Some(entry.data.clone())
    }

    /// Replace the cache content with a fresh fetch
    ///
    /// Users missing from `users` are dropped.
    pub fn replace_all(&self, users: HashMap<String, RestAuthData>) {
        let fetched_at = Instant::now();
        let entries = users
            .into_iter()
            .map(|(username, data)| {
                let entry = AuthCacheEntry {
                    username: username.clone(),
                    data,
                    fetched_at,
                };
                (username, entry)
            })
            .collect();
        *self.entries.write() = entries;
    }

    /// Fetch all users from `source` and replace the cache content
    ///
    /// On failure the current entries are kept and keep aging.
    pub async fn refresh(&self, source: &dyn RestAuthSource) -> Result<usize> {
        let users = source.fetch_rest_users().await?;
        let count = users.len();
        self.replace_all(users);
        debug!(users = count, "refreshed REST auth cache");
        Ok(count)
    }

    /// Number of cached users, expired ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache holds no users
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn is_expired(&self, entry: &AuthCacheEntry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.fetched_at) >= ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAuthSource;
    use mdcache_common::Error;
    use serde_json::json;

    fn users(names: &[&str]) -> HashMap<String, RestAuthData> {
        names
            .iter()
            .map(|name| {
                (
                    (*name).to_string(),
                    RestAuthData {
                        password_hash: format!("$A$005${name}"),
                        privileges: json!({"read": true}),
                    },
                )
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = AuthCache::new(Some(Duration::from_secs(10)));
        cache.replace_all(users(&["u"]));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        let data = cache.get("u").expect("entry still fresh");
        assert_eq!(data.password_hash, "$A$005$u");

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get("u").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_restamps_entries() {
        let cache = AuthCache::new(Some(Duration::from_secs(10)));
        cache.replace_all(users(&["u"]));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.replace_all(users(&["u"]));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(cache.get("u").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_ttl_never_expires() {
        let cache = AuthCache::new(None);
        cache.replace_all(users(&["u"]));
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert!(cache.get("u").is_some());
    }

    #[test]
    fn test_missing_users_dropped() {
        let cache = AuthCache::new(None);
        cache.replace_all(users(&["a", "b"]));
        cache.replace_all(users(&["b"]));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("nobody").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_aging_entries() {
        let cache = AuthCache::new(Some(Duration::from_secs(10)));
        let source = ScriptedAuthSource::new(Ok(users(&["u"])));

        assert_eq!(cache.refresh(&source).await.unwrap(), 1);

        source.set(Err(Error::connection("md1:3306", "refused")));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.refresh(&source).await.is_err());
        assert!(cache.get("u").is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get("u").is_none());
    }
}
