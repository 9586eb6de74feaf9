//! Cache key builders.
//!
//! Pure functions mapping domain identifiers to key strings. Keys share one
//! flat namespace in the store, so every builder starts with the content
//! namespace it belongs to.

use std::fmt;

use sha2::{Digest, Sha256};
use slug::slugify;

use crate::domain::content::Namespace;

/// Longest joined id list kept verbatim before it is replaced by a digest.
const MAX_INLINE_ID_LIST: usize = 128;

/// A cache key string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Apply a deployment-wide prefix. An empty prefix is a no-op.
    pub fn prefixed(&self, prefix: &str) -> CacheKey {
        if prefix.is_empty() {
            self.clone()
        } else {
            CacheKey(format!("{prefix}{}", self.0))
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Normalize a free-form identifier into a key segment.
///
/// Separators and case differences collapse (`"Ocean Suite"` and
/// `"ocean-suite"` share a segment); empty input becomes `_`.
pub fn segment(raw: &str) -> String {
    let normalized = slugify(raw);
    if normalized.is_empty() {
        "_".to_string()
    } else {
        normalized
    }
}

fn optional_segment(raw: Option<&str>) -> String {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => segment(value),
        None => "all".to_string(),
    }
}

/// Key of a namespace's version counter.
pub fn version_key(namespace: impl AsRef<str>) -> CacheKey {
    CacheKey(format!("v:{}", namespace.as_ref()))
}

/// Key of the set listing every entry written under `tag`.
pub fn tag_set_key(tag: &str) -> CacheKey {
    CacheKey(format!("tag:{tag}"))
}

pub fn blog_by_slug(slug: &str) -> CacheKey {
    CacheKey(format!("{}:slug:{}", Namespace::Blogs, segment(slug)))
}

pub fn blog_list(category: Option<&str>, page: u32, page_size: u32) -> CacheKey {
    CacheKey(format!(
        "{}:list:{}:p{page}:s{page_size}",
        Namespace::Blogs,
        optional_segment(category)
    ))
}

pub fn room_by_slug(slug: &str) -> CacheKey {
    CacheKey(format!("{}:slug:{}", Namespace::Rooms, segment(slug)))
}

pub fn rooms_list() -> CacheKey {
    CacheKey(format!("{}:list", Namespace::Rooms))
}

pub fn offers_active() -> CacheKey {
    CacheKey(format!("{}:active", Namespace::Offers))
}

pub fn events_upcoming(page: u32) -> CacheKey {
    CacheKey(format!("{}:upcoming:p{page}", Namespace::Events))
}

pub fn attractions_nearby() -> CacheKey {
    CacheKey(format!("{}:nearby", Namespace::Attractions))
}

pub fn gallery(category: Option<&str>) -> CacheKey {
    CacheKey(format!(
        "{}:{}",
        Namespace::Gallery,
        optional_segment(category)
    ))
}

pub fn testimonials() -> CacheKey {
    CacheKey(format!("{}:all", Namespace::Testimonials))
}

pub fn static_images(section: &str) -> CacheKey {
    CacheKey(format!("{}:{}", Namespace::StaticImages, segment(section)))
}

/// Key for a batch lookup by id. Order and duplicates do not matter.
///
/// Ids are kept verbatim; `\` and `,` are escaped so distinct id lists never
/// share a key.
pub fn by_ids<I: fmt::Display>(namespace: Namespace, ids: &[I]) -> CacheKey {
    let mut parts: Vec<String> = ids.iter().map(|id| escape_id(&id.to_string())).collect();
    parts.sort();
    parts.dedup();
    let joined = parts.join(",");

    if joined.len() <= MAX_INLINE_ID_LIST {
        return CacheKey(format!("{namespace}:ids:{joined}"));
    }

    let digest = Sha256::digest(joined.as_bytes());
    CacheKey(format!("{namespace}:ids:sha256:{}", hex::encode(digest)))
}

fn escape_id(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '\\' | ',') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Fold a namespace version into a key: `rooms:list` at version 4 becomes
/// `rooms:v4:list`. Keys from other namespaces are nested whole.
pub fn versioned(namespace: Namespace, version: u64, key: &CacheKey) -> CacheKey {
    let own_prefix = format!("{namespace}:");
    let rest = key
        .as_str()
        .strip_prefix(own_prefix.as_str())
        .unwrap_or(key.as_str());
    CacheKey(format!("{namespace}:v{version}:{rest}"))
}
