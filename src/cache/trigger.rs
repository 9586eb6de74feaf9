//! Invalidation trigger.
//!
//! Called by write paths after a successful mutation: bumps the namespace
//! version and tells the front-end which tags went stale.

use serde::Serialize;
use tracing::debug;

use super::config::CacheConfig;
use super::version::VersionCounter;
use crate::domain::content::Namespace;
use crate::infra::revalidate::{RevalidateOutcome, RevalidationDispatcher};
use crate::infra::store::StoreError;

/// What a mutation hook did.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TriggerReport {
    pub namespace: Namespace,
    /// New namespace generation, `None` when caching is disabled.
    pub version: Option<u64>,
    pub tags: Vec<String>,
    /// `None` when no revalidation endpoint is configured.
    pub revalidation: Option<RevalidateOutcome>,
}

/// Mutation hooks for content write paths.
///
/// # Usage
///
/// ```ignore
/// // After a room row was updated:
/// trigger.room_upserted(&room.slug).await?;
/// ```
pub struct InvalidationTrigger {
    config: CacheConfig,
    versions: VersionCounter,
    dispatcher: Option<RevalidationDispatcher>,
}

impl InvalidationTrigger {
    pub fn new(
        config: CacheConfig,
        versions: VersionCounter,
        dispatcher: Option<RevalidationDispatcher>,
    ) -> Self {
        Self {
            config,
            versions,
            dispatcher,
        }
    }

    /// Bump `namespace` and dispatch its tag plus `item_tags`.
    ///
    /// The version bump must succeed; the webhook is best effort and its
    /// failure only shows up in the report.
    pub async fn content_changed(
        &self,
        namespace: Namespace,
        item_tags: &[String],
    ) -> Result<TriggerReport, StoreError> {
        let mut tags = vec![namespace.tag()];
        for tag in item_tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        if !self.config.enabled {
            debug!(%namespace, "Invalidation skipped: cache disabled");
            return Ok(TriggerReport {
                namespace,
                version: None,
                tags,
                revalidation: None,
            });
        }

        let version = self.versions.bump(namespace).await?;

        let revalidation = match &self.dispatcher {
            Some(dispatcher) => Some(dispatcher.revalidate_tags(&tags).await),
            None => {
                debug!(%namespace, "No revalidation endpoint configured");
                None
            }
        };

        Ok(TriggerReport {
            namespace,
            version: Some(version),
            tags,
            revalidation,
        })
    }

    async fn item_changed(
        &self,
        namespace: Namespace,
        slug: &str,
    ) -> Result<TriggerReport, StoreError> {
        let item = namespace.item_tag(slug);
        self.content_changed(namespace, std::slice::from_ref(&item))
            .await
    }

    pub async fn room_upserted(&self, slug: &str) -> Result<TriggerReport, StoreError> {
        self.item_changed(Namespace::Rooms, slug).await
    }

    pub async fn room_deleted(&self, slug: &str) -> Result<TriggerReport, StoreError> {
        self.item_changed(Namespace::Rooms, slug).await
    }

    pub async fn blog_upserted(&self, slug: &str) -> Result<TriggerReport, StoreError> {
        self.item_changed(Namespace::Blogs, slug).await
    }

    pub async fn blog_deleted(&self, slug: &str) -> Result<TriggerReport, StoreError> {
        self.item_changed(Namespace::Blogs, slug).await
    }

    pub async fn offer_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::Offers, &[]).await
    }

    pub async fn event_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::Events, &[]).await
    }

    pub async fn attraction_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::Attractions, &[]).await
    }

    pub async fn gallery_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::Gallery, &[]).await
    }

    pub async fn testimonial_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::Testimonials, &[]).await
    }

    pub async fn static_image_changed(&self) -> Result<TriggerReport, StoreError> {
        self.content_changed(Namespace::StaticImages, &[]).await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Option<&RevalidationDispatcher> {
        self.dispatcher.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Url;

    use super::*;
    use crate::infra::store::{KvStore, MemoryStore};

    fn trigger(dispatcher: Option<RevalidationDispatcher>) -> (InvalidationTrigger, VersionCounter) {
        let store = Arc::new(MemoryStore::new(16));
        let versions = VersionCounter::new(store, "");
        (
            InvalidationTrigger::new(CacheConfig::default(), versions.clone(), dispatcher),
            versions,
        )
    }

    #[tokio::test]
    async fn hook_bumps_version_and_collects_tags() {
        let (trigger, versions) = trigger(None);

        let report = trigger.room_upserted("deluxe-suite").await.expect("trigger");
        assert_eq!(report.version, Some(1));
        assert_eq!(report.tags, vec!["rooms", "room:deluxe-suite"]);
        assert_eq!(report.revalidation, None);

        trigger.room_deleted("deluxe-suite").await.expect("trigger");
        assert_eq!(versions.get(Namespace::Rooms).await.expect("get"), 2);
    }

    #[tokio::test]
    async fn duplicate_item_tags_are_sent_once() {
        let (trigger, _) = trigger(None);
        let report = trigger
            .content_changed(
                Namespace::Gallery,
                &["gallery".to_string(), "gallery".to_string()],
            )
            .await
            .expect("trigger");
        assert_eq!(report.tags, vec!["gallery"]);
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let store = Arc::new(MemoryStore::new(16));
        let versions = VersionCounter::new(store.clone(), "");
        let trigger = InvalidationTrigger::new(
            CacheConfig {
                enabled: false,
                ..Default::default()
            },
            versions,
            None,
        );

        let report = trigger.offer_changed().await.expect("trigger");
        assert_eq!(report.version, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn webhook_failure_does_not_fail_the_hook() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);
        let dispatcher = RevalidationDispatcher::new(
            Url::parse(&format!("http://{addr}/api/revalidate")).expect("url"),
            "secret",
            "token",
            Duration::from_secs(1),
        )
        .expect("dispatcher");

        let (trigger, _) = trigger(Some(dispatcher));
        let report = trigger.blog_upserted("spring-menu").await.expect("trigger");

        assert_eq!(report.version, Some(1));
        let outcome = report.revalidation.expect("dispatched");
        assert!(!outcome.success);
    }

    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::rejected("GET", "down"))
        }
        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _expiry: Option<Duration>,
        ) -> Result<(), StoreError> {
            Err(StoreError::rejected("SET", "down"))
        }
        async fn incr(&self, _key: &str) -> Result<i64, StoreError> {
            Err(StoreError::rejected("INCR", "down"))
        }
        async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
            Err(StoreError::rejected("DEL", "down"))
        }
        async fn json_get(&self, _key: &str) -> Result<Option<serde_json::Value>, StoreError> {
            Err(StoreError::rejected("JSON.GET", "down"))
        }
        async fn json_set(&self, _key: &str, _value: &serde_json::Value) -> Result<(), StoreError> {
            Err(StoreError::rejected("JSON.SET", "down"))
        }
        async fn sadd(
            &self,
            _key: &str,
            _members: &[String],
            _expiry: Option<Duration>,
        ) -> Result<u64, StoreError> {
            Err(StoreError::rejected("SADD", "down"))
        }
        async fn smembers(&self, _key: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::rejected("SMEMBERS", "down"))
        }
        async fn srem(&self, _key: &str, _members: &[String]) -> Result<u64, StoreError> {
            Err(StoreError::rejected("SREM", "down"))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::rejected("PING", "down"))
        }
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let trigger = InvalidationTrigger::new(
            CacheConfig::default(),
            VersionCounter::new(Arc::new(DownStore), ""),
            None,
        );
        let err = trigger.event_changed().await.expect_err("store down");
        assert!(matches!(err, StoreError::Rejected { command: "INCR", .. }));
    }
}
