//! `xqd_purge_*`: invalidating cached objects by surrogate key.

use crate::cache::engine::CacheEngine;

bitflags::bitflags! {
    pub struct PurgeOptionsMask: u32 {
        const SOFT_PURGE = 1 << 0;
    }
}

/// Purge every cached object tagged with `surrogate_key`. A soft purge marks matching objects
/// stale (so a subsequent transactional lookup observes `Stale = true` and elects a new leader
/// for a stale-while-revalidate refresh per §4.8) rather than removing them outright.
pub fn purge_surrogate_key(engine: &CacheEngine, surrogate_key: &str, soft: bool) {
    if soft {
        engine.mark_surrogate_key_stale(surrogate_key);
    } else {
        engine.evict_surrogate_key(surrogate_key);
    }
}
