use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use tracing::info;

use super::{KvStore, SADD_EXTEND_SCRIPT, StoreError, expiry_secs};

/// Store backed by a Redis server speaking RESP.
///
/// The connection manager reconnects on its own; each command clones the
/// handle, which is cheap and lets concurrent requests pipeline.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    sadd_extend: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!(
            target = "resort_cache::store",
            backend = "redis",
            "Connected to key-value store"
        );
        Ok(Self {
            connection,
            sadd_extend: Script::new(SADD_EXTEND_SCRIPT),
        })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = expiry {
            cmd.arg("EX").arg(expiry_secs(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn json_get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        raw.map(|text| {
            serde_json::from_str(&text).map_err(|err| StoreError::protocol("JSON.GET", err.to_string()))
        })
        .transpose()
    }

    async fn json_set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("JSON.SET")
            .arg(key)
            .arg("$")
            .arg(value.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        expiry: Option<Duration>,
    ) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let added: u64 = self
            .sadd_extend
            .key(key)
            .arg(expiry.map_or(0, expiry_secs))
            .arg(members)
            .invoke_async(&mut conn)
            .await?;
        Ok(added)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection.clone();
        let removed: u64 = conn.srem(key, members).await?;
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::protocol("PING", reply))
        }
    }
}
