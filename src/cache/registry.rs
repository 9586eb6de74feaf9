//! Tag registry.
//!
//! Every tagged write adds its key to the set stored under `tag:<tag>`, so
//! any process sharing the store can purge entries that another process's
//! readers wrote. A tag set lives as long as its longest-lived member and
//! is emptied when the tag is purged.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::keys::{CacheKey, tag_set_key};
use crate::infra::store::{KvStore, StoreError};

#[derive(Clone)]
pub struct TagRegistry {
    store: Arc<dyn KvStore>,
    key_prefix: String,
}

impl TagRegistry {
    pub fn new(store: Arc<dyn KvStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn set_key(&self, tag: &str) -> CacheKey {
        tag_set_key(tag).prefixed(&self.key_prefix)
    }

    /// Record that `key` was written under `tags` with the entry's `ttl`.
    pub async fn register(
        &self,
        key: &CacheKey,
        tags: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let member = [key.as_str().to_string()];
        let unique: BTreeSet<&str> = tags.iter().map(String::as_str).collect();
        for tag in unique {
            self.store
                .sadd(self.set_key(tag).as_str(), &member, ttl)
                .await?;
        }
        Ok(())
    }

    /// Keys registered under `tag`, as stored (prefix included).
    pub async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, StoreError> {
        self.store.smembers(self.set_key(tag).as_str()).await
    }

    /// Drop `keys` from the tag's set once they were deleted.
    pub async fn release(&self, tag: &str, keys: &[String]) -> Result<u64, StoreError> {
        self.store.srem(self.set_key(tag).as_str(), keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{blog_by_slug, blog_list, rooms_list};
    use crate::infra::store::MemoryStore;

    fn registry() -> (TagRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(64));
        (TagRegistry::new(store.clone(), ""), store)
    }

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|tag| tag.to_string()).collect()
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let (registry, _) = registry();
        let post = blog_by_slug("spring-menu");
        let list = blog_list(None, 1, 9);

        registry
            .register(&post, &tags(&["blogs", "blog:spring-menu"]), None)
            .await
            .expect("register");
        registry
            .register(&list, &tags(&["blogs"]), None)
            .await
            .expect("register");

        assert_eq!(
            registry.keys_for_tag("blogs").await.expect("lookup"),
            vec!["blogs:list:all:p1:s9", "blogs:slug:spring-menu"]
        );
        assert_eq!(
            registry.keys_for_tag("blog:spring-menu").await.expect("lookup"),
            vec!["blogs:slug:spring-menu"]
        );
        assert!(registry.keys_for_tag("rooms").await.expect("lookup").is_empty());
    }

    #[tokio::test]
    async fn tag_sets_live_in_the_store_under_prefix() {
        let store = Arc::new(MemoryStore::new(8));
        let writer = TagRegistry::new(store.clone(), "resort:");
        let reader = TagRegistry::new(store.clone(), "resort:");

        writer
            .register(&rooms_list().prefixed("resort:"), &tags(&["rooms", "rooms"]), None)
            .await
            .expect("register");

        assert_eq!(
            store.smembers("resort:tag:rooms").await.expect("smembers"),
            vec!["resort:rooms:list"]
        );
        assert_eq!(
            reader.keys_for_tag("rooms").await.expect("lookup"),
            vec!["resort:rooms:list"]
        );
    }

    #[tokio::test]
    async fn release_removes_members_and_empty_sets() {
        let (registry, store) = registry();
        registry
            .register(&rooms_list(), &tags(&["rooms"]), None)
            .await
            .expect("register");

        let keys = registry.keys_for_tag("rooms").await.expect("lookup");
        assert_eq!(registry.release("rooms", &keys).await.expect("release"), 1);
        assert!(registry.keys_for_tag("rooms").await.expect("lookup").is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tag_sets_expire_with_their_entries() {
        let (registry, _) = registry();
        registry
            .register(&rooms_list(), &tags(&["rooms"]), Some(Duration::from_secs(30)))
            .await
            .expect("register");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(registry.keys_for_tag("rooms").await.expect("lookup").is_empty());
    }
}
