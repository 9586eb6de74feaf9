use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use tokio::time::Instant;
use tracing::warn;

use super::{KvStore, StoreError, expiry_secs};

const SOURCE: &str = "infra::store::memory";

#[derive(Clone)]
enum Slot {
    Text(String),
    Json(serde_json::Value),
    Set(BTreeSet<String>),
}

#[derive(Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

fn deadline(now: Instant, expiry: Option<Duration>) -> Option<Instant> {
    expiry.map(|ttl| now + Duration::from_secs(expiry_secs(ttl)))
}

fn wrong_type(command: &'static str, slot: &Slot) -> StoreError {
    let held = match slot {
        Slot::Text(_) => "a plain string",
        Slot::Json(_) => "a JSON document",
        Slot::Set(_) => "a set",
    };
    StoreError::rejected(command, format!("WRONGTYPE key holds {held}"))
}

/// In-process store with lazy TTL expiry.
///
/// Bounded by an LRU capacity so a long-running process cannot grow without
/// limit; remote backends leave eviction to the server.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, Entry>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!(
                op,
                target_module = SOURCE,
                result = "poisoned_recovered",
                "Recovered from poisoned store lock; entries may be stale"
            );
            poisoned.into_inner()
        })
    }

    fn live_entry(&self, key: &str, op: &'static str) -> Option<Entry> {
        let mut entries = self.lock(op);
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live_entry(key, "get") {
            Some(Entry {
                slot: Slot::Text(value),
                ..
            }) => Ok(Some(value)),
            Some(Entry { slot, .. }) => Err(wrong_type("GET", &slot)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Duration>,
    ) -> Result<(), StoreError> {
        let entry = Entry {
            slot: Slot::Text(value.to_string()),
            expires_at: deadline(Instant::now(), expiry),
        };
        self.lock("set").put(key.to_string(), entry);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.lock("incr");
        let now = Instant::now();

        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => match &entry.slot {
                Slot::Text(text) => {
                    let value = text.parse::<i64>().map_err(|_| {
                        StoreError::rejected("INCR", "value is not an integer or out of range")
                    })?;
                    (value, entry.expires_at)
                }
                other => return Err(wrong_type("INCR", other)),
            },
            _ => (0, None),
        };

        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::rejected("INCR", "increment would overflow"))?;
        entries.put(
            key.to_string(),
            Entry {
                slot: Slot::Text(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.lock("del");
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.pop(key.as_str())
                && entry.is_live(now)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn json_get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        match self.live_entry(key, "json_get") {
            Some(Entry {
                slot: Slot::Json(value),
                ..
            }) => Ok(Some(value)),
            Some(Entry { slot, .. }) => Err(wrong_type("JSON.GET", &slot)),
            None => Ok(None),
        }
    }

    async fn json_set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let entry = Entry {
            slot: Slot::Json(value.clone()),
            expires_at: None,
        };
        self.lock("json_set").put(key.to_string(), entry);
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
        let mut entries = self.lock("sadd");
        let now = Instant::now();
        let wanted = deadline(now, expiry);

        let (mut set, expires_at) = match entries.pop(key) {
            Some(entry) if entry.is_live(now) => match entry.slot {
                Slot::Set(set) => {
                    let expires_at = match (entry.expires_at, wanted) {
                        (Some(current), Some(wanted)) => Some(current.max(wanted)),
                        _ => None,
                    };
                    (set, expires_at)
                }
                other => {
                    let err = wrong_type("SADD", &other);
                    entries.put(
                        key.to_string(),
                        Entry {
                            slot: other,
                            expires_at: entry.expires_at,
                        },
                    );
                    return Err(err);
                }
            },
            _ => (BTreeSet::new(), wanted),
        };

        let before = set.len();
        set.extend(members.iter().cloned());
        let added = (set.len() - before) as u64;
        entries.put(
            key.to_string(),
            Entry {
                slot: Slot::Set(set),
                expires_at,
            },
        );
        Ok(added)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.live_entry(key, "smembers") {
            Some(Entry {
                slot: Slot::Set(set),
                ..
            }) => Ok(set.into_iter().collect()),
            Some(Entry { slot, .. }) => Err(wrong_type("SMEMBERS", &slot)),
            None => Ok(Vec::new()),
        }
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
        let mut entries = self.lock("srem");
        let now = Instant::now();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        if !entry.is_live(now) {
            return Ok(0);
        }
        let removed = match &mut entry.slot {
            Slot::Set(set) => members
                .iter()
                .filter(|member| set.remove(member.as_str()))
                .count() as u64,
            other => return Err(wrong_type("SREM", other)),
        };
        if matches!(&entry.slot, Slot::Set(set) if set.is_empty()) {
            entries.pop(key);
        }
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
