//! Per-namespace version counters.
//!
//! A namespace's version is the `INCR` counter stored under `v:<namespace>`.
//! Mutations bump it; reads that build their key with
//! [`ContentCache::versioned_key`](super::ContentCache::versioned_key) pick
//! up the new generation and stop hitting entries of the old one.

use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use super::keys::version_key;
use crate::infra::store::{KvStore, StoreError};

pub(crate) const METRIC_VERSION_BUMP_TOTAL: &str = "resort_version_bump_total";

#[derive(Clone)]
pub struct VersionCounter {
    store: Arc<dyn KvStore>,
    key_prefix: String,
}

impl VersionCounter {
    pub fn new(store: Arc<dyn KvStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Atomically advance the namespace generation and return the new value.
    pub async fn bump(&self, namespace: impl AsRef<str>) -> Result<u64, StoreError> {
        let namespace = namespace.as_ref();
        let key = version_key(namespace).prefixed(&self.key_prefix);
        let value = self.store.incr(key.as_str()).await?;
        let version = u64::try_from(value)
            .map_err(|_| StoreError::protocol("INCR", format!("negative version {value}")))?;

        counter!(METRIC_VERSION_BUMP_TOTAL, "namespace" => namespace.to_string()).increment(1);
        debug!(
            target = "resort_cache::version",
            namespace,
            version,
            "Namespace version bumped"
        );
        Ok(version)
    }

    /// Current generation, `0` when the namespace was never bumped.
    pub async fn get(&self, namespace: impl AsRef<str>) -> Result<u64, StoreError> {
        let key = version_key(namespace).prefixed(&self.key_prefix);
        match self.store.get(key.as_str()).await? {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                StoreError::protocol("GET", format!("version under `{key}` is not a counter: {raw}"))
            }),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::Namespace;
    use crate::infra::store::MemoryStore;

    fn counter_with_store() -> (VersionCounter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(64));
        (VersionCounter::new(store.clone(), ""), store)
    }

    #[tokio::test]
    async fn unset_namespace_reads_zero() {
        let (versions, _) = counter_with_store();
        assert_eq!(versions.get(Namespace::Blogs).await.expect("get"), 0);
    }

    #[tokio::test]
    async fn n_bumps_yield_n() {
        let (versions, _) = counter_with_store();
        for expected in 1..=5 {
            assert_eq!(versions.bump(Namespace::Rooms).await.expect("bump"), expected);
        }
        assert_eq!(versions.get(Namespace::Rooms).await.expect("get"), 5);
        assert_eq!(versions.get(Namespace::Offers).await.expect("get"), 0);
    }

    #[tokio::test]
    async fn concurrent_bumps_are_not_lost() {
        let (versions, _) = counter_with_store();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let versions = versions.clone();
            handles.push(tokio::spawn(
                async move { versions.bump("blogs").await },
            ));
        }
        for handle in handles {
            handle.await.expect("join").expect("bump");
        }
        assert_eq!(versions.get("blogs").await.expect("get"), 50);
    }

    #[tokio::test]
    async fn counter_key_uses_prefix() {
        let store = Arc::new(MemoryStore::new(8));
        let versions = VersionCounter::new(store.clone(), "resort:");
        versions.bump(Namespace::Events).await.expect("bump");

        assert_eq!(
            store.get("resort:v:events").await.expect("get").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn garbage_counter_is_a_protocol_error() {
        let (versions, store) = counter_with_store();
        store.set("v:gallery", "three", None).await.expect("set");
        let err = versions.get(Namespace::Gallery).await.expect_err("garbage");
        assert!(matches!(err, StoreError::Protocol { command: "GET", .. }));
    }
}
