//! Cache-aside reads.
//!
//! [`ContentCache::get_or_set`] checks the store, falls back to the caller's
//! compute on a miss, writes the result back and records the invalidation
//! tags the caller declared.

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

use super::codec::{Codec, CodecError, JsonCodec};
use super::config::CacheConfig;
use super::flight::{self, FlightGuard, Landing, Role, SingleFlight};
use super::keys::{self, CacheKey};
use super::registry::TagRegistry;
use super::version::VersionCounter;
use crate::domain::content::Namespace;
use crate::infra::store::{KvStore, StoreError};

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "resort_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "resort_cache_miss_total";
pub(crate) const METRIC_CACHE_CORRUPT_TOTAL: &str = "resort_cache_corrupt_total";
pub(crate) const METRIC_CACHE_BYPASS_TOTAL: &str = "resort_cache_bypass_total";
pub(crate) const METRIC_CACHE_FLIGHT_SHARED_TOTAL: &str = "resort_cache_flight_shared_total";
pub(crate) const METRIC_CACHE_COMPUTE_MS: &str = "resort_cache_compute_ms";
pub(crate) const METRIC_TAG_PURGE_TOTAL: &str = "resort_tag_purge_total";

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("computing cache value failed: {0}")]
    Compute(#[source] BoxError),
}

/// Options of a single cache-aside read.
#[derive(Debug, Clone)]
pub struct GetOrSet {
    key: CacheKey,
    ttl: Option<Duration>,
    revalidate: bool,
    tags: Vec<String>,
}

impl GetOrSet {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            ttl: None,
            revalidate: false,
            tags: Vec::new(),
        }
    }

    /// Expire the written entry after `ttl` instead of the configured default.
    /// Stores count whole seconds; a sub-second `ttl` rounds up to one.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Skip the read and recompute unconditionally.
    pub fn revalidate(mut self, revalidate: bool) -> Self {
        self.revalidate = revalidate;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// Cache-aside helper over an injected key-value store.
pub struct ContentCache {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
    registry: TagRegistry,
    versions: VersionCounter,
    flights: SingleFlight,
}

impl ContentCache {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        let versions = VersionCounter::new(Arc::clone(&store), config.key_prefix.clone());
        let registry = TagRegistry::new(Arc::clone(&store), config.key_prefix.clone());
        Self {
            store,
            config,
            registry,
            versions,
            flights: SingleFlight::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    pub fn versions(&self) -> &VersionCounter {
        &self.versions
    }

    /// Cache-aside read using the JSON codec.
    pub async fn get_or_set<T, F, Fut, E>(&self, options: GetOrSet, compute: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.get_or_set_with(options, &JsonCodec::new(), compute)
            .await
    }

    /// Cache-aside read with an explicit codec.
    ///
    /// A stored value the codec cannot decode is treated as a miss. Store
    /// failures on read or write propagate; there is no stale fallback.
    pub async fn get_or_set_with<T, C, F, Fut, E>(
        &self,
        options: GetOrSet,
        codec: &C,
        compute: F,
    ) -> Result<T, CacheError>
    where
        C: Codec<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        if !self.config.enabled {
            return compute().await.map_err(|err| CacheError::Compute(err.into()));
        }

        let key = options.key.prefixed(&self.config.key_prefix);

        if options.revalidate {
            counter!(METRIC_CACHE_BYPASS_TOTAL).increment(1);
            debug!(cache_key = %key, result = "bypass", "Cache read skipped");
            return self.compute_and_store(&key, &options, codec, compute, None).await;
        }

        match self.store.get(key.as_str()).await? {
            Some(raw) => match codec.decode(&raw) {
                Ok(value) => {
                    counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
                    debug!(cache_key = %key, result = "hit", "Cache read");
                    return Ok(value);
                }
                Err(err) => {
                    counter!(METRIC_CACHE_CORRUPT_TOTAL).increment(1);
                    warn!(
                        cache_key = %key,
                        result = "corrupt",
                        error = %err,
                        "Cached value could not be decoded; recomputing"
                    );
                }
            },
            None => {
                counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
                debug!(cache_key = %key, result = "miss", "Cache read");
            }
        }

        if !self.config.single_flight {
            return self.compute_and_store(&key, &options, codec, compute, None).await;
        }

        match self.flights.join(key.as_str()) {
            Role::Leader(guard) => {
                self.compute_and_store(&key, &options, codec, compute, Some(guard))
                    .await
            }
            Role::Follower(slot) => {
                if let Landing::Value(payload) = flight::wait(slot).await
                    && let Ok(value) = codec.decode(&payload)
                {
                    self.registry
                        .register(&key, &options.tags, self.entry_ttl(&options))
                        .await?;
                    counter!(METRIC_CACHE_FLIGHT_SHARED_TOTAL).increment(1);
                    debug!(cache_key = %key, result = "shared", "Joined in-flight compute");
                    return Ok(value);
                }
                debug!(
                    cache_key = %key,
                    result = "abandoned",
                    "In-flight compute failed; computing independently"
                );
                self.compute_and_store(&key, &options, codec, compute, None)
                    .await
            }
        }
    }

    async fn compute_and_store<T, C, F, Fut, E>(
        &self,
        key: &CacheKey,
        options: &GetOrSet,
        codec: &C,
        compute: F,
        flight: Option<FlightGuard>,
    ) -> Result<T, CacheError>
    where
        C: Codec<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let started = Instant::now();
        let value = compute()
            .await
            .map_err(|err| CacheError::Compute(err.into()))?;
        histogram!(METRIC_CACHE_COMPUTE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        let encoded = codec.encode(&value)?;
        let ttl = self.entry_ttl(options);
        self.store.set(key.as_str(), &encoded, ttl).await?;
        self.registry.register(key, &options.tags, ttl).await?;

        debug!(
            cache_key = %key,
            ttl_secs = ttl.map(|ttl| ttl.as_secs()),
            tags = ?options.tags,
            "Cache entry written"
        );

        if let Some(guard) = flight {
            guard.land(Arc::from(encoded));
        }

        Ok(value)
    }

    fn entry_ttl(&self, options: &GetOrSet) -> Option<Duration> {
        options.ttl.or_else(|| self.config.default_ttl())
    }

    /// Advance the generation of `namespace`. Store failures propagate.
    pub async fn bump_version(&self, namespace: impl AsRef<str>) -> Result<u64, StoreError> {
        self.versions.bump(namespace).await
    }

    pub async fn get_version(&self, namespace: impl AsRef<str>) -> Result<u64, StoreError> {
        self.versions.get(namespace).await
    }

    /// Compose `key` with the current generation of `namespace`.
    ///
    /// After [`VersionCounter::bump`], the same call yields a new key, so
    /// entries written under the previous generation are never read again
    /// and age out through their TTL.
    pub async fn versioned_key(
        &self,
        namespace: Namespace,
        key: &CacheKey,
    ) -> Result<CacheKey, StoreError> {
        let version = self.versions.get(namespace).await?;
        Ok(keys::versioned(namespace, version, key))
    }

    /// [`get_or_set`](Self::get_or_set) under a versioned key. The namespace
    /// tag is attached automatically.
    pub async fn get_or_set_versioned<T, F, Fut, E>(
        &self,
        namespace: Namespace,
        options: GetOrSet,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let key = if self.config.enabled {
            self.versioned_key(namespace, &options.key).await?
        } else {
            options.key.clone()
        };
        let mut options = GetOrSet { key, ..options };
        if !options.tags.iter().any(|tag| tag == namespace.as_str()) {
            options.tags.push(namespace.tag());
        }
        self.get_or_set(options, compute).await
    }

    /// Delete one entry. Returns whether it existed.
    ///
    /// Tag sets keep listing the key until the tag is purged or the set
    /// expires; deleting an absent key then is a no-op.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool, StoreError> {
        let key = key.prefixed(&self.config.key_prefix);
        let removed = self.store.del(&[key.into_string()]).await?;
        Ok(removed > 0)
    }

    /// Delete every entry written under `tag`. Returns how many existed.
    ///
    /// The tag set is only trimmed after the entries are gone, so a failed
    /// purge can be retried.
    pub async fn purge_tag(&self, tag: &str) -> Result<u64, StoreError> {
        let keys = self.registry.keys_for_tag(tag).await?;
        if keys.is_empty() {
            debug!(tag, purged = 0, "Tag purge found no entries");
            return Ok(0);
        }

        let removed = self.store.del(&keys).await?;
        counter!(METRIC_TAG_PURGE_TOTAL).increment(1);
        if let Err(err) = self.registry.release(tag, &keys).await {
            warn!(tag, error = %err, "Purged entries but could not trim tag set");
        }
        debug!(tag, purged = removed, registered = keys.len(), "Tag purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::infra::store::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Room {
        id: u32,
        name: String,
    }

    fn room(name: &str) -> Room {
        Room {
            id: 1,
            name: name.to_string(),
        }
    }

    fn cache() -> (ContentCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(64));
        (
            ContentCache::new(store.clone(), CacheConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn second_read_hits_without_compute() {
        let (cache, _) = cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Room = cache
                .get_or_set(GetOrSet::new("rooms:1"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(room("Room A"))
                })
                .await
                .expect("read");
            assert_eq!(value, room("Room A"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_recomputed_and_overwritten() {
        let (cache, store) = cache();
        store.set("rooms:1", "{not json", None).await.expect("seed");

        let value: Room = cache
            .get_or_set(GetOrSet::new("rooms:1"), || async {
                Ok::<_, Infallible>(room("Room A"))
            })
            .await
            .expect("corrupt entry is a miss");

        assert_eq!(value, room("Room A"));
        assert_eq!(
            store.get("rooms:1").await.expect("get").as_deref(),
            Some(r#"{"id":1,"name":"Room A"}"#)
        );
    }

    #[tokio::test]
    async fn revalidate_forces_recompute() {
        let (cache, _) = cache();
        let _: Room = cache
            .get_or_set(GetOrSet::new("rooms:1"), || async {
                Ok::<_, Infallible>(room("Room A"))
            })
            .await
            .expect("first read");

        let value: Room = cache
            .get_or_set(GetOrSet::new("rooms:1").revalidate(true), || async {
                Ok::<_, Infallible>(room("Room B"))
            })
            .await
            .expect("forced read");
        assert_eq!(value, room("Room B"));

        let cached: Room = cache
            .get_or_set(GetOrSet::new("rooms:1"), || async {
                Ok::<_, Infallible>(room("unused"))
            })
            .await
            .expect("cached read");
        assert_eq!(cached, room("Room B"));
    }

    #[tokio::test]
    async fn compute_errors_propagate_and_store_nothing() {
        let (cache, store) = cache();
        let err = cache
            .get_or_set::<Room, _, _, _>(GetOrSet::new("rooms:1"), || async {
                Err("database unavailable")
            })
            .await
            .expect_err("compute failed");

        assert!(matches!(err, CacheError::Compute(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn custom_codec_is_used_both_ways() {
        let (cache, store) = cache();
        let codec = crate::cache::codec::FnCodec::new(
            |value: &u32| Ok::<_, CodecError>(format!("count={value}")),
            |raw: &str| {
                raw.strip_prefix("count=")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| CodecError::Decode(raw.to_string()))
            },
        );

        let value = cache
            .get_or_set_with(GetOrSet::new("offers:count"), &codec, || async {
                Ok::<_, Infallible>(3_u32)
            })
            .await
            .expect("read");
        assert_eq!(value, 3);
        assert_eq!(
            store.get("offers:count").await.expect("get").as_deref(),
            Some("count=3")
        );
    }

    #[tokio::test]
    async fn disabled_cache_always_computes() {
        let store = Arc::new(MemoryStore::new(8));
        let cache = ContentCache::new(
            store.clone(),
            CacheConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _: u32 = cache
                .get_or_set(GetOrSet::new("rooms:list"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(1)
                })
                .await
                .expect("read");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn prefix_and_default_ttl_apply_to_writes() {
        let store = Arc::new(MemoryStore::new(8));
        let cache = ContentCache::new(
            store.clone(),
            CacheConfig {
                key_prefix: "resort:".to_string(),
                ..Default::default()
            },
        );

        let _: u32 = cache
            .get_or_set(GetOrSet::new(keys::rooms_list()), || async {
                Ok::<_, Infallible>(2)
            })
            .await
            .expect("read");

        assert!(store.get("resort:rooms:list").await.expect("get").is_some());
        assert!(store.get("rooms:list").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_compute() {
        let (cache, _) = cache();
        let cache = Arc::new(cache);
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set(GetOrSet::new("events:upcoming:p1"), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok::<_, Infallible>(vec![1_u32, 2, 3])
                    })
                    .await
            }));
        }

        // Let every task reach either the compute or the flight wait.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        gate.notify_waiters();

        for handle in handles {
            let value = handle.await.expect("join").expect("read");
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn versioned_reads_move_to_new_generation_after_bump() {
        let (cache, store) = cache();
        let key = keys::blog_list(None, 1, 9);

        let first: Vec<String> = cache
            .get_or_set_versioned(Namespace::Blogs, GetOrSet::new(key.clone()), || async {
                Ok::<_, Infallible>(vec!["old".to_string()])
            })
            .await
            .expect("first read");
        assert_eq!(first, vec!["old"]);
        assert!(store.get("blogs:v0:list:all:p1:s9").await.expect("get").is_some());

        cache.versions().bump(Namespace::Blogs).await.expect("bump");

        let second: Vec<String> = cache
            .get_or_set_versioned(Namespace::Blogs, GetOrSet::new(key), || async {
                Ok::<_, Infallible>(vec!["new".to_string()])
            })
            .await
            .expect("second read");
        assert_eq!(second, vec!["new"]);
        assert!(store.get("blogs:v1:list:all:p1:s9").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn purge_tag_deletes_registered_entries() {
        let (cache, store) = cache();

        let _: u32 = cache
            .get_or_set(
                GetOrSet::new(keys::blog_by_slug("spring-menu")).tags(["blogs", "blog:spring-menu"]),
                || async { Ok::<_, Infallible>(1) },
            )
            .await
            .expect("read");
        let _: u32 = cache
            .get_or_set(GetOrSet::new(keys::rooms_list()).tag("rooms"), || async {
                Ok::<_, Infallible>(2)
            })
            .await
            .expect("read");

        assert_eq!(cache.purge_tag("blog:spring-menu").await.expect("purge"), 1);
        assert!(store.get("blogs:slug:spring-menu").await.expect("get").is_none());
        assert!(store.get("rooms:list").await.expect("get").is_some());
        assert_eq!(cache.purge_tag("blog:spring-menu").await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let (cache, _) = cache();
        let key = keys::offers_active();
        let _: u32 = cache
            .get_or_set(GetOrSet::new(key.clone()).tag("offers"), || async {
                Ok::<_, Infallible>(1)
            })
            .await
            .expect("read");

        assert!(cache.invalidate(&key).await.expect("invalidate"));
        assert!(!cache.invalidate(&key).await.expect("invalidate"));
        assert_eq!(cache.purge_tag("offers").await.expect("purge"), 0);
    }

    #[tokio::test]
    async fn purge_reaches_entries_written_by_another_instance() {
        let store = Arc::new(MemoryStore::new(64));
        let reader = ContentCache::new(store.clone(), CacheConfig::default());
        let receiver = ContentCache::new(store.clone(), CacheConfig::default());

        let _: Vec<u32> = reader
            .get_or_set(GetOrSet::new(keys::rooms_list()).tag("rooms"), || async {
                Ok::<_, Infallible>(vec![1, 2])
            })
            .await
            .expect("read");

        assert_eq!(receiver.purge_tag("rooms").await.expect("purge"), 1);
        assert!(store.get("rooms:list").await.expect("get").is_none());
        assert!(reader.registry().keys_for_tag("rooms").await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn failed_purge_can_be_retried() {
        let store = Arc::new(FlakyDel::default());
        let cache = ContentCache::new(store.clone(), CacheConfig::default());
        let _: u32 = cache
            .get_or_set(GetOrSet::new(keys::rooms_list()).tag("rooms"), || async {
                Ok::<_, Infallible>(1)
            })
            .await
            .expect("read");

        store.fail_next_del.store(true, Ordering::SeqCst);
        cache.purge_tag("rooms").await.expect_err("del fails");
        assert!(store.inner.get("rooms:list").await.expect("get").is_some());

        assert_eq!(cache.purge_tag("rooms").await.expect("retry"), 1);
        assert!(store.inner.get("rooms:list").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn follower_registers_its_own_tags() {
        let (cache, _) = cache();
        let cache = Arc::new(cache);
        let gate = Arc::new(tokio::sync::Notify::new());

        let leader = {
            let cache = Arc::clone(&cache);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                cache
                    .get_or_set(GetOrSet::new(keys::offers_active()).tag("offers"), || async move {
                        gate.notified().await;
                        Ok::<_, Infallible>(7_u32)
                    })
                    .await
            })
        };
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_set(
                        GetOrSet::new(keys::offers_active()).tag("offer:spa-week"),
                        || async { Ok::<_, Infallible>(0_u32) },
                    )
                    .await
            })
        };
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        gate.notify_waiters();

        assert_eq!(leader.await.expect("join").expect("leader"), 7);
        assert_eq!(follower.await.expect("join").expect("follower"), 7);
        assert_eq!(
            cache.registry().keys_for_tag("offer:spa-week").await.expect("lookup"),
            vec!["offers:active"]
        );
    }

    #[derive(Default)]
    struct FlakyDel {
        inner: MemoryStore,
        fail_next_del: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl KvStore for FlakyDel {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(
            &self,
            key: &str,
            value: &str,
            expiry: Option<Duration>,
        ) -> Result<(), StoreError> {
            self.inner.set(key, value, expiry).await
        }

        async fn incr(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.incr(key).await
        }

        async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
            if self.fail_next_del.swap(false, Ordering::SeqCst) {
                return Err(StoreError::rejected("DEL", "connection reset"));
            }
            self.inner.del(keys).await
        }

        async fn json_get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
            self.inner.json_get(key).await
        }

        async fn json_set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
            self.inner.json_set(key, value).await
        }

        async fn sadd(
            &self,
            key: &str,
            members: &[String],
            expiry: Option<Duration>,
        ) -> Result<u64, StoreError> {
            self.inner.sadd(key, members, expiry).await
        }

        async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
            self.inner.smembers(key).await
        }

        async fn srem(&self, key: &str, members: &[String]) -> Result<u64, StoreError> {
            self.inner.srem(key, members).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }
}
