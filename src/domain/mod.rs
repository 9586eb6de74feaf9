//! Domain vocabulary shared by the cache and invalidation layers.

pub mod content;
