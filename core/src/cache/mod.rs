//! Content-addressed cache storage.
//!
//! A [`CacheStore`] persists opaque bytes by key. [`FilesystemStore`] keeps
//! entries on local disk, [`RedisStore`] on a remote Redis, optionally over
//! mutual TLS. [`CacheManager`] sits on top of a store and guarantees a single
//! population per key within the process.

mod fs_store;
mod manager;
mod redis_store;

pub use fs_store::FilesystemStore;
pub use manager::{CacheManager, Origin, Resolution};
pub use redis_store::RedisStore;

use crate::config::CacheBackend;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One stored value. A new `set` replaces every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    #[serde(with = "crate::types::bytes::base64_bytes")]
    pub value: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let stored_at = Utc::now();
        let expires_at = effective_ttl(ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| stored_at + ttl);

        Self {
            key: key.to_string(),
            value,
            stored_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Uniform contract over storage backends. Implementations must be safe to
/// share between concurrent sessions.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stored bytes, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrites any prior value. A `ttl` of zero or `None` never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Removes the entry; absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Builds the store selected by the validated backend configuration.
pub fn open_store(backend: &CacheBackend) -> Result<Arc<dyn CacheStore>> {
    match backend {
        CacheBackend::Filesystem { dir } => {
            tracing::debug!(dir = %dir.display(), "opening filesystem cache");
            Ok(Arc::new(FilesystemStore::new(dir.clone())?))
        }
        CacheBackend::Redis(config) => {
            tracing::debug!(tls = config.tls.is_some(), "opening redis cache");
            Ok(Arc::new(RedisStore::new(config)?))
        }
    }
}

pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|ttl| !ttl.is_zero())
}

/// Maps a key such as `sha256:abcd` onto a safe file name.
pub fn sanitize_cache_key(key: &str) -> String {
    key.replace('/', "-")
        .replace(':', "_")
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new("k", b"v".to_vec(), None);
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired_at(Utc::now() + chrono::Duration::days(3650)));

        let zero = CacheEntry::new("k", b"v".to_vec(), Some(Duration::ZERO));
        assert!(zero.expires_at.is_none());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new("k", b"v".to_vec(), Some(Duration::from_secs(60)));
        assert!(!entry.is_expired());
        assert!(entry.is_expired_at(entry.stored_at + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_sanitize_cache_key() {
        assert_eq!(sanitize_cache_key("sha256:ABC/def"), "sha256_ABC-def");
    }
}
