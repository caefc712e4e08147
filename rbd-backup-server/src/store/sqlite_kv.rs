use super::{resolve_range, KvStore, StoreError};
use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

/// SQLite-backed store: a `kv` table for plain keys and a `kv_list` table
/// whose autoincrement id preserves append order.
#[derive(Clone)]
pub struct SqliteKv {
    db: DbPool,
}

impl SqliteKv {
    pub fn open(db_path: &str) -> anyhow::Result<Self> {
        let db = create_pool(db_path)?;
        migrate(&db)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
        .await?
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM kv WHERE key = ?)",
                params![key],
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
        .await?
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let db = self.db.clone();
        let keys = keys.to_vec();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            let mut removed = 0u64;
            for key in &keys {
                removed += conn.execute("DELETE FROM kv WHERE key = ?", params![key])? as u64;
            }
            Ok(removed)
        })
        .await?
    }

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let list = list.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            conn.execute(
                "INSERT INTO kv_list (list, value) VALUES (?1, ?2)",
                params![list, value],
            )?;
            Ok(())
        })
        .await?
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let db = self.db.clone();
        let list = list.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            let mut stmt = conn.prepare("SELECT value FROM kv_list WHERE list = ? ORDER BY id")?;
            let values = stmt
                .query_map(params![list], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match resolve_range(values.len(), start, stop) {
                Some(r) => values[r].to_vec(),
                None => Vec::new(),
            })
        })
        .await?
    }

    async fn remove(&self, list: &str, value: &str) -> Result<u64, StoreError> {
        let db = self.db.clone();
        let list = list.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            let conn = db.get()?;
            let removed = conn.execute(
                "DELETE FROM kv_list WHERE list = ?1 AND value = ?2",
                params![list, value],
            )?;
            Ok(removed as u64)
        })
        .await?
    }
}
