//! Cache configuration.
//!
//! Controls the cache-aside helper via the `[cache]` section of
//! `resort-cache.toml`.

use std::time::Duration;

use serde::Deserialize;

/// Cache configuration resolved from settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off, reads always compute and triggers do nothing.
    pub enabled: bool,
    /// Prepended to every key, including version counters.
    pub key_prefix: String,
    /// Expiry used when a read does not name its own TTL. `None` stores
    /// entries without expiry.
    pub default_ttl_seconds: Option<u64>,
    /// Share one in-flight compute between concurrent misses of a key.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: String::new(),
            default_ttl_seconds: None,
            single_flight: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            key_prefix: settings.key_prefix.clone(),
            default_ttl_seconds: settings.default_ttl.map(|ttl| ttl.as_secs()),
            single_flight: settings.single_flight,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.single_flight);
        assert_eq!(config.key_prefix, "");
        assert_eq!(config.default_ttl(), None);
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let config = CacheConfig {
            default_ttl_seconds: Some(0),
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), None);
    }

    #[test]
    fn ttl_converts_to_duration() {
        let config = CacheConfig {
            default_ttl_seconds: Some(300),
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(300)));
    }
}
