//! The `CachedObject`/`CacheTransaction` domain objects and the `xqd_cache_*` /
//! `xqd_http_cache_*` ABI surface (§3, §4.8).

pub mod engine;

pub use engine::{CacheEngine, CacheError, CachedObject};
