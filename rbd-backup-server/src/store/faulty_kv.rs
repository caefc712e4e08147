//! Test double that fails selected commands of an inner store.

use super::sqlite_kv::SqliteKv;
use super::{KvStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct FaultyKv {
    inner: SqliteKv,
    fail_all: AtomicBool,
    fail_push: AtomicBool,
    fail_set_suffix: Mutex<Option<String>>,
}

impl FaultyKv {
    pub fn new(inner: SqliteKv) -> Self {
        Self {
            inner,
            fail_all: AtomicBool::new(false),
            fail_push: AtomicBool::new(false),
            fail_set_suffix: Mutex::new(None),
        }
    }

    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn fail_push(&self, on: bool) {
        self.fail_push.store(on, Ordering::SeqCst);
    }

    /// Fails `set` for keys ending in `suffix`.
    pub fn fail_set_on(&self, suffix: &str) {
        *self.fail_set_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    fn check(&self, command: &str) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("{command}: connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FaultyKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check("GET")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check("SET")?;
        let failing = self
            .fail_set_suffix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|suffix| key.ends_with(suffix));
        if failing {
            return Err(StoreError::Backend(format!("SET {key}: read only replica")));
        }
        self.inner.set(key, value).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check("EXISTS")?;
        self.inner.exists(key).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.check("DEL")?;
        self.inner.delete(keys).await
    }

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.check("RPUSH")?;
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("RPUSH {list}: read only replica")));
        }
        self.inner.push(list, value).await
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        self.check("LRANGE")?;
        self.inner.range(list, start, stop).await
    }

    async fn remove(&self, list: &str, value: &str) -> Result<u64, StoreError> {
        self.check("LREM")?;
        self.inner.remove(list, value).await
    }
}
