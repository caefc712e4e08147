//! Key-value backing store.
//!
//! Job records, progress values, status values and repositories live in a
//! flat key space plus append-only list indexes. Two backends implement it:
//! Redis for networked deployments and SQLite for a single box.

#[cfg(test)]
pub(crate) mod faulty_kv;
pub mod redis_kv;
pub mod sqlite_kv;

use async_trait::async_trait;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("store task failed: {e}"))
    }
}

/// Minimal command set shared by both backends. Every call is one round trip.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes every given key, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Inclusive range with Redis `LRANGE` index semantics (negative counts from the end).
    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Removes every occurrence of `value` from `list`.
    async fn remove(&self, list: &str, value: &str) -> Result<u64, StoreError>;
}

pub type SharedStore = Arc<dyn KvStore>;

/// Opens the store named by `url`: `redis://`/`rediss://` selects Redis,
/// anything else is taken as a SQLite database path.
pub async fn open(url: &str) -> anyhow::Result<SharedStore> {
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let store = redis_kv::RedisKv::connect(url).await?;
        Ok(Arc::new(store))
    } else {
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        let store = sqlite_kv::SqliteKv::open(path)?;
        Ok(Arc::new(store))
    }
}

/// Resolves an `LRANGE`-style inclusive index pair against a list of `len`
/// items into a half-open slice range.
pub(crate) fn resolve_range(len: usize, start: i64, stop: i64) -> Option<std::ops::Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some(start as usize..(stop + 1) as usize)
}
