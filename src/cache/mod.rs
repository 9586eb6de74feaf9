//! Resort content cache.
//!
//! Cache-aside reads over a shared key-value store, with two invalidation
//! paths:
//!
//! - **Versioned keys**: reads built with [`ContentCache::versioned_key`]
//!   embed the namespace generation; a mutation bumps it and old entries are
//!   simply never read again.
//! - **Tags**: every write records the tags its reader declared in the
//!   shared store; a revalidation webhook naming a tag purges those keys,
//!   whichever process wrote them.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! key_prefix = ""
//! default_ttl_seconds = 300
//! single_flight = true
//! ```

mod aside;
mod codec;
mod config;
mod flight;
pub mod keys;
mod registry;
mod trigger;
mod version;

pub use aside::{BoxError, CacheError, ContentCache, GetOrSet};
pub use codec::{Codec, CodecError, FnCodec, JsonCodec};
pub use config::CacheConfig;
pub use keys::CacheKey;
pub use registry::TagRegistry;
pub use trigger::{InvalidationTrigger, TriggerReport};
pub use version::VersionCounter;

pub(crate) use aside::{
    METRIC_CACHE_BYPASS_TOTAL, METRIC_CACHE_COMPUTE_MS, METRIC_CACHE_CORRUPT_TOTAL,
    METRIC_CACHE_FLIGHT_SHARED_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_TAG_PURGE_TOTAL,
};
pub(crate) use version::METRIC_VERSION_BUMP_TOTAL;
