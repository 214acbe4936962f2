//! The shared cache index: non-transactional lookup/insert plus the transactional
//! request-collapsing protocol (§4.8).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use thiserror::Error;
use xqd_shared::{CacheLookupState, XqdStatus};

use crate::error::AsStatus;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("from must not exceed to in a body range read")]
    InvalidRange,
    #[error("no object has been published under this transaction yet")]
    NotReady,
}

impl AsStatus for CacheError {
    fn as_status(&self) -> XqdStatus {
        match self {
            CacheError::InvalidRange => XqdStatus::INVALID_ARGUMENT,
            CacheError::NotReady => XqdStatus::NONE,
        }
    }
}

/// One cached response body plus its cache-relevant metadata (§3 "CachedObject").
#[derive(Debug, Clone)]
pub struct CachedObject {
    pub key: Vec<u8>,
    pub body: Vec<u8>,
    pub metadata: Vec<u8>,
    pub content_length: Option<u64>,
    pub max_age_ns: u64,
    pub stale_while_revalidate_ns: Option<u64>,
    pub edge_max_age_ns: Option<u64>,
    pub inserted_at_ns: u64,
    pub surrogate_keys: HashSet<String>,
    pub sensitive: bool,
    pub vary_rule: String,
}

impl CachedObject {
    /// `get_body` with a `[from, to)` range; `from > to` is the caller's error, per §4.8.
    pub fn body_range(&self, from: Option<u64>, to: Option<u64>) -> Result<&[u8], CacheError> {
        let from = from.unwrap_or(0) as usize;
        let to = to.map(|t| t as usize).unwrap_or(self.body.len());
        if from > to {
            return Err(CacheError::InvalidRange);
        }
        let to = to.min(self.body.len());
        let from = from.min(to);
        Ok(&self.body[from..to])
    }

    pub fn age_ns(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.inserted_at_ns)
    }

    fn is_fresh(&self, now_ns: u64) -> bool {
        self.age_ns(now_ns) < self.max_age_ns
    }

    fn is_within_swr_window(&self, now_ns: u64) -> bool {
        match self.stale_while_revalidate_ns {
            Some(swr) => self.age_ns(now_ns) < self.max_age_ns + swr,
            None => false,
        }
    }
}

/// Per-key transaction state: the published object (if any), the hit counter, an election
/// flag for the single concurrent writer, and a `Notify` waiters block on until the leader
/// publishes or cancels.
pub struct CacheSlot {
    object: RwLock<Option<CachedObject>>,
    hits: AtomicU64,
    leader_active: AtomicBool,
    forced_stale: AtomicBool,
    notify: tokio::sync::Notify,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            object: RwLock::new(None),
            hits: AtomicU64::new(0),
            leader_active: AtomicBool::new(false),
            forced_stale: AtomicBool::new(false),
            notify: tokio::sync::Notify::new(),
        }
    }

    /// `busy_handle_wait`: block until the current leader publishes, cancels, or updates.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn object(&self) -> Option<CachedObject> {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.object.read().unwrap().clone()
    }
}

/// The result of a transactional lookup (§4.8 step 1): the slot to act on, and the state the
/// caller observes for it.
pub struct Transaction {
    pub slot: Arc<CacheSlot>,
    pub state: CacheLookupState,
    pub is_leader: bool,
}

/// The process-lifetime cache index, sharded to bound lock contention (§4.8, §5).
pub struct CacheEngine {
    shards: Vec<RwLock<HashMap<Vec<u8>, Arc<CacheSlot>>>>,
    surrogate_index: RwLock<HashMap<String, HashSet<Vec<u8>>>>,
}

impl Default for CacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheEngine {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            surrogate_index: RwLock::new(HashMap::new()),
        }
    }

    fn shard(&self, key: &[u8]) -> &RwLock<HashMap<Vec<u8>, Arc<CacheSlot>>> {
        let mut hasher = Sha256::new();
        hasher.update(key);
        let digest = hasher.finalize();
        let idx = digest[0] as usize % SHARD_COUNT;
        &self.shards[idx]
    }

    fn slot_for(&self, key: &[u8]) -> Arc<CacheSlot> {
        let shard = self.shard(key);
        if let Some(slot) = shard.read().unwrap().get(key) {
            return slot.clone();
        }
        let mut shard = shard.write().unwrap();
        shard
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(CacheSlot::new()))
            .clone()
    }

    /// Non-transactional `lookup` (§4.8).
    pub fn lookup(&self, key: &[u8]) -> CacheLookupState {
        let slot = self.slot_for(key);
        self.state_of(&slot)
    }

    pub(crate) fn state_of(&self, slot: &CacheSlot) -> CacheLookupState {
        let now = now_ns();
        match slot.object.read().unwrap().as_ref() {
            None => CacheLookupState::empty(),
            Some(obj) => {
                let forced_stale = slot.forced_stale.load(Ordering::Relaxed);
                let fresh = !forced_stale && obj.is_fresh(now);
                let mut state = CacheLookupState::FOUND;
                if fresh {
                    state |= CacheLookupState::USABLE;
                } else if obj.is_within_swr_window(now) {
                    state |= CacheLookupState::USABLE | CacheLookupState::STALE;
                } else {
                    state |= CacheLookupState::STALE;
                }
                state
            }
        }
    }

    /// `transaction_lookup`: elects a leader for the key if no fresh object exists and no
    /// leader is already active.
    pub fn transaction_lookup(&self, key: &[u8]) -> Transaction {
        let slot = self.slot_for(key);
        let mut state = self.state_of(&slot);
        let needs_leader = !state.contains(CacheLookupState::USABLE);
        let is_leader = needs_leader
            && slot
                .leader_active
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
        if is_leader {
            state |= CacheLookupState::MUST_INSERT_OR_UPDATE;
        }
        Transaction { slot, state, is_leader }
    }

    /// `transaction_insert` / `transaction_insert_and_stream_back`: the leader publishes a
    /// fresh object and wakes every waiter.
    pub fn transaction_insert(&self, txn: &Transaction, mut object: CachedObject) {
        object.key = txn.slot.object.read().unwrap().as_ref().map(|o| o.key.clone()).unwrap_or(object.key);
        self.index_surrogate_keys(&object);
        *txn.slot.object.write().unwrap() = Some(object);
        txn.slot.forced_stale.store(false, Ordering::Relaxed);
        txn.slot.leader_active.store(false, Ordering::SeqCst);
        txn.slot.notify.notify_waiters();
    }

    /// `transaction_update`: metadata-only refresh (e.g. extending freshness after a
    /// revalidation 304) without replacing the body.
    pub fn transaction_update(&self, txn: &Transaction, max_age_ns: u64) {
        if let Some(obj) = txn.slot.object.write().unwrap().as_mut() {
            obj.max_age_ns = max_age_ns;
            obj.inserted_at_ns = now_ns();
        }
        txn.slot.forced_stale.store(false, Ordering::Relaxed);
        txn.slot.leader_active.store(false, Ordering::SeqCst);
        txn.slot.notify.notify_waiters();
    }

    /// `transaction_cancel`: the leader gives up without publishing; re-opens the election so
    /// another waiter may become leader.
    pub fn transaction_cancel(&self, txn: &Transaction) {
        txn.slot.leader_active.store(false, Ordering::SeqCst);
        txn.slot.notify.notify_waiters();
    }

    fn index_surrogate_keys(&self, object: &CachedObject) {
        if object.surrogate_keys.is_empty() {
            return;
        }
        let mut index = self.surrogate_index.write().unwrap();
        for sk in &object.surrogate_keys {
            index.entry(sk.clone()).or_default().insert(object.key.clone());
        }
    }

    /// `purge_surrogate_key` soft purge: mark every object tagged with `surrogate_key` stale.
    pub fn mark_surrogate_key_stale(&self, surrogate_key: &str) {
        let keys: Vec<Vec<u8>> = self
            .surrogate_index
            .read()
            .unwrap()
            .get(surrogate_key)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for key in keys {
            if let Some(slot) = self.shard(&key).read().unwrap().get(&key) {
                slot.forced_stale.store(true, Ordering::Relaxed);
                slot.notify.notify_waiters();
            }
        }
    }

    /// `purge_surrogate_key` hard purge: evict every object tagged with `surrogate_key`.
    pub fn evict_surrogate_key(&self, surrogate_key: &str) {
        let keys: Vec<Vec<u8>> = self
            .surrogate_index
            .write()
            .unwrap()
            .remove(surrogate_key)
            .unwrap_or_default()
            .into_iter()
            .collect();
        for key in keys {
            self.shard(&key).write().unwrap().remove(&key);
        }
    }

    /// `is_request_cacheable`: only GET and HEAD are cacheable, per §4.8.
    pub fn is_request_cacheable(method: &http::Method) -> bool {
        matches!(*method, http::Method::GET | http::Method::HEAD)
    }

    /// `get_suggested_cache_key`: SHA-256 over the canonicalized URL.
    pub fn suggested_cache_key(url: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.finalize().into()
    }
}

pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(key: &[u8], max_age: Duration) -> CachedObject {
        CachedObject {
            key: key.to_vec(),
            body: b"hello".to_vec(),
            metadata: Vec::new(),
            content_length: Some(5),
            max_age_ns: max_age.as_nanos() as u64,
            stale_while_revalidate_ns: None,
            edge_max_age_ns: None,
            inserted_at_ns: now_ns(),
            surrogate_keys: HashSet::new(),
            sensitive: false,
            vary_rule: String::new(),
        }
    }

    #[test]
    fn lookup_on_empty_key_reports_not_found() {
        let engine = CacheEngine::new();
        assert_eq!(engine.lookup(b"missing"), CacheLookupState::empty());
    }

    #[test]
    fn first_lookup_elects_a_leader() {
        let engine = CacheEngine::new();
        let txn = engine.transaction_lookup(b"k");
        assert!(txn.is_leader);
        assert!(txn.state.contains(CacheLookupState::MUST_INSERT_OR_UPDATE));
    }

    #[test]
    fn second_concurrent_lookup_is_not_leader() {
        let engine = CacheEngine::new();
        let first = engine.transaction_lookup(b"k");
        assert!(first.is_leader);
        let second = engine.transaction_lookup(b"k");
        assert!(!second.is_leader);
    }

    #[test]
    fn cancel_reopens_the_election() {
        let engine = CacheEngine::new();
        let first = engine.transaction_lookup(b"k");
        engine.transaction_cancel(&first);
        let second = engine.transaction_lookup(b"k");
        assert!(second.is_leader);
    }

    #[test]
    fn insert_makes_object_found_and_usable() {
        let engine = CacheEngine::new();
        let txn = engine.transaction_lookup(b"k");
        engine.transaction_insert(&txn, object(b"k", Duration::from_secs(60)));
        let state = engine.lookup(b"k");
        assert!(state.contains(CacheLookupState::FOUND));
        assert!(state.contains(CacheLookupState::USABLE));
    }

    #[test]
    fn soft_purge_marks_surrogate_key_stale() {
        let engine = CacheEngine::new();
        let mut obj = object(b"k", Duration::from_secs(60));
        obj.surrogate_keys.insert("tag".to_string());
        let txn = engine.transaction_lookup(b"k");
        engine.transaction_insert(&txn, obj);
        engine.mark_surrogate_key_stale("tag");
        let state = engine.lookup(b"k");
        assert!(state.contains(CacheLookupState::STALE));
    }

    #[test]
    fn hard_purge_evicts_the_object() {
        let engine = CacheEngine::new();
        let mut obj = object(b"k", Duration::from_secs(60));
        obj.surrogate_keys.insert("tag".to_string());
        let txn = engine.transaction_lookup(b"k");
        engine.transaction_insert(&txn, obj);
        engine.evict_surrogate_key("tag");
        assert_eq!(engine.lookup(b"k"), CacheLookupState::empty());
    }

    #[test]
    fn body_range_rejects_from_greater_than_to() {
        let obj = object(b"k", Duration::from_secs(60));
        assert!(obj.body_range(Some(4), Some(1)).is_err());
        assert_eq!(obj.body_range(Some(1), Some(4)).unwrap(), b"ell");
    }

    #[test]
    fn is_request_cacheable_matches_get_and_head_only() {
        assert!(CacheEngine::is_request_cacheable(&http::Method::GET));
        assert!(CacheEngine::is_request_cacheable(&http::Method::HEAD));
        assert!(!CacheEngine::is_request_cacheable(&http::Method::POST));
    }
}
