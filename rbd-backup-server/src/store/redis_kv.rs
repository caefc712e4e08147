use super::{KvStore, StoreError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Redis-backed store. One multiplexed connection is opened at construction
/// and shared by every caller; after a failed command it is dropped and the
/// next call reconnects. Failed commands are not retried.
#[derive(Clone)]
pub struct RedisKv {
    client: redis::Client,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisKv {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(url = %url, "Redis store connected");
        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(Some(conn))),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        tracing::debug!("Redis store reconnected");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn run<T: FromRedisValue + Send>(
        &self,
        operation: &'static str,
        cmd: redis::Cmd,
    ) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<T> = cmd.query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "Redis command failed");
                *self.connection.lock().await = None;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run("get", cmd).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run("set", cmd).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(key);
        self.run("exists", cmd).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        self.run("delete", cmd).await
    }

    async fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(list).arg(value);
        let _len: u64 = self.run("push", cmd).await?;
        Ok(())
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(list).arg(start).arg(stop);
        self.run("range", cmd).await
    }

    async fn remove(&self, list: &str, value: &str) -> Result<u64, StoreError> {
        let mut cmd = redis::cmd("LREM");
        cmd.arg(list).arg(0).arg(value);
        self.run("remove", cmd).await
    }
}
