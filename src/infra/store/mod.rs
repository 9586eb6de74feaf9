//! Key-value store clients.
//!
//! Every backend speaks the same small command set (GET, SET with optional
//! EX, INCR, DEL, JSON.GET, JSON.SET, and SADD/SMEMBERS/SREM for the tag
//! index). Callers hold an `Arc<dyn KvStore>` so
//! the backend is chosen once at startup and swapped for [`MemoryStore`] in
//! tests.

mod memory;
mod redis;
mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::rest::RestStore;

use crate::config::{StoreBackend, StoreSettings};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store rejected `{command}`: {message}")]
    Rejected {
        command: &'static str,
        message: String,
    },
    #[error("unexpected reply to `{command}`: {message}")]
    Protocol {
        command: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn protocol(command: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            command,
            message: message.into(),
        }
    }

    pub fn rejected(command: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            message: message.into(),
        }
    }
}

/// Remote key-value store used as the cache backend.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `SET key value`, with `EX` when an expiry is supplied.
    async fn set(&self, key: &str, value: &str, expiry: Option<Duration>)
    -> Result<(), StoreError>;

    /// Atomic increment; an absent key counts from zero.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Returns the number of keys that existed and were removed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    async fn json_get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn json_set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    /// Add `members` to the set at `key` and return how many were new.
    ///
    /// The set is kept alive at least `expiry` from now: a fresh set gets
    /// that expiry, a volatile set with less time left is extended and a
    /// persistent set stays persistent. `None` makes the set persistent.
    async fn sadd(
        &self,
        key: &str,
        members: &[String],
        expiry: Option<Duration>,
    ) -> Result<u64, StoreError>;

    /// Members of the set at `key`; empty when the key is absent.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// `EX` seconds for an expiry: rounded up, never below one second.
///
/// Every backend goes through this so a sub-second TTL means the same thing
/// on all of them.
pub fn expiry_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Server-side body of [`KvStore::sadd`] for Redis-speaking backends.
///
/// `ARGV[1]` is the expiry in seconds (0 for persistent), the rest are the
/// members. `TTL` answers -1 for a persistent key, which is left alone.
pub(crate) const SADD_EXTEND_SCRIPT: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
local added = redis.call('SADD', KEYS[1], unpack(ARGV, 2))
local ttl = tonumber(ARGV[1])
if ttl <= 0 then
  redis.call('PERSIST', KEYS[1])
elseif existed == 0 then
  redis.call('EXPIRE', KEYS[1], ttl)
else
  local left = redis.call('TTL', KEYS[1])
  if left >= 0 and left < ttl then
    redis.call('EXPIRE', KEYS[1], ttl)
  end
end
return added
"#;

/// `JSON.GET` decoded into a concrete type.
pub async fn json_get_as<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.json_get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| StoreError::protocol("JSON.GET", err.to_string())),
        None => Ok(None),
    }
}

/// Build the configured store backend.
pub async fn connect(settings: &StoreSettings) -> Result<Arc<dyn KvStore>, StoreError> {
    let store: Arc<dyn KvStore> = match settings.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(settings.memory_capacity)),
        StoreBackend::Redis => {
            let url = settings
                .url
                .as_deref()
                .ok_or_else(|| StoreError::rejected("CONNECT", "store.url is required for redis"))?;
            Arc::new(RedisStore::connect(url).await?)
        }
        StoreBackend::Rest => {
            let raw = settings
                .url
                .as_deref()
                .ok_or_else(|| StoreError::rejected("CONNECT", "store.url is required for rest"))?;
            let url = reqwest::Url::parse(raw)
                .map_err(|err| StoreError::rejected("CONNECT", format!("invalid store.url: {err}")))?;
            let token = settings.token.clone().unwrap_or_default();
            Arc::new(RestStore::new(url, token)?)
        }
    };

    Ok(store)
}
