//! The `KvStore` domain object and the `xqd_kv_*` ABI surface (§4.9).
//!
//! The teacher's `kv_store` module is a guest-side client calling out through hostcalls; this
//! is the other half, an in-process store the host owns directly. Keys, values, and generation
//! bookkeeping follow the same rules the teacher documents (`kv_store.rs`'s doc comment on key
//! validity), applied here as host-side validation instead of guest-side documentation.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use xqd_shared::KvError;

const MAX_KEY_LEN: usize = 1024;
const DEFAULT_LIST_LIMIT: usize = 100;

/// One versioned value in a [`KvStoreObj`].
#[derive(Debug, Clone)]
pub struct ObjectValue {
    pub body: Vec<u8>,
    pub metadata: String,
    pub generation: u64,
    pub expires_at: Option<u64>,
}

impl ObjectValue {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Write mode for `kv_insert`, mirroring §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Overwrite,
    Add,
    Append,
    Prepend,
}

/// One named KV store; the host process holds one `KvStoreObj` per registered store name and
/// it outlives any single instance (§3 "Lifecycle").
#[derive(Default)]
pub struct KvStoreObj {
    entries: std::sync::RwLock<BTreeMap<String, ObjectValue>>,
}

impl KvStoreObj {
    pub fn new() -> Self {
        Self::default()
    }

    /// `kv_lookup`: an expired entry is treated as absent and opportunistically removed.
    pub fn lookup(&self, key: &str) -> Option<ObjectValue> {
        let now = now_ns();
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(v) if v.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(v) => Some(v.clone()),
            None => None,
        }
    }

    /// `kv_insert`.
    pub fn insert(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: String,
        ttl: Option<Duration>,
        mode: InsertMode,
        if_generation_match: Option<u64>,
    ) -> Result<u64, KvError> {
        validate_key(key)?;
        let now = now_ns();
        let mut entries = self.entries.write().unwrap();
        let existing = entries.get(key).filter(|v| !v.is_expired(now));

        if let Some(expected) = if_generation_match {
            match existing {
                Some(v) if v.generation == expected => {}
                _ => return Err(KvError::PreconditionFailed),
            }
        }

        let new_body = match mode {
            InsertMode::Overwrite => body,
            InsertMode::Add => {
                if existing.is_some() {
                    return Err(KvError::PreconditionFailed);
                }
                body
            }
            InsertMode::Append => {
                let mut buf = existing.map(|v| v.body.clone()).unwrap_or_default();
                buf.extend_from_slice(&body);
                buf
            }
            InsertMode::Prepend => {
                let mut buf = body;
                if let Some(v) = existing {
                    buf.extend_from_slice(&v.body);
                }
                buf
            }
        };

        let generation = now;
        let expires_at = ttl.map(|d| now + d.as_nanos() as u64);
        entries.insert(
            key.to_string(),
            ObjectValue {
                body: new_body,
                metadata,
                generation,
                expires_at,
            },
        );
        Ok(generation)
    }

    /// `kv_delete`: idempotent.
    pub fn delete(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }

    /// `kv_list`: sorted keys under `prefix`, paginated by an opaque base64 cursor over the last
    /// returned key.
    pub fn list(
        &self,
        prefix: &str,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), KvError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let now = now_ns();
        let after = cursor
            .map(|c| {
                base64::decode(c)
                    .ok()
                    .and_then(|b| String::from_utf8(b).ok())
                    .ok_or(KvError::BadRequest)
            })
            .transpose()?;

        let entries = self.entries.read().unwrap();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, v)| k.starts_with(prefix) && !v.is_expired(now))
            .map(|(k, _)| k.clone())
            .filter(|k| after.as_deref().map_or(true, |a| k.as_str() > a))
            .collect();
        keys.sort();

        let truncated = keys.len() > limit;
        keys.truncate(limit);
        let next_cursor = if truncated {
            keys.last().map(|k| base64::encode(k.as_bytes()))
        } else {
            None
        };
        Ok((keys, next_cursor))
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}

/// Key validity rules from §3 "KVStore": length 1..=1024 bytes, forbidden characters, and two
/// reserved names.
pub fn validate_key(key: &str) -> Result<(), KvError> {
    let len = key.len();
    if len == 0 || len > MAX_KEY_LEN {
        return Err(KvError::BadRequest);
    }
    if key == "." || key == ".." {
        return Err(KvError::BadRequest);
    }
    if key.starts_with(".well-known/acme-challenge/") {
        return Err(KvError::BadRequest);
    }
    if key
        .bytes()
        .any(|b| matches!(b, b'\r' | b'\n' | b'#' | b';' | b'?' | b'^' | b'|'))
    {
        return Err(KvError::BadRequest);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let store = KvStoreObj::new();
        store
            .insert("k", b"v".to_vec(), String::new(), None, InsertMode::Overwrite, None)
            .unwrap();
        assert_eq!(store.lookup("k").unwrap().body, b"v");
    }

    #[test]
    fn add_mode_rejects_existing_key() {
        let store = KvStoreObj::new();
        store
            .insert("k", b"v".to_vec(), String::new(), None, InsertMode::Overwrite, None)
            .unwrap();
        let err = store
            .insert("k", b"v2".to_vec(), String::new(), None, InsertMode::Add, None)
            .unwrap_err();
        assert!(matches!(err, KvError::PreconditionFailed));
    }

    #[test]
    fn generation_mismatch_is_rejected() {
        let store = KvStoreObj::new();
        let gen = store
            .insert("k", b"v".to_vec(), String::new(), None, InsertMode::Overwrite, None)
            .unwrap();
        assert!(store
            .insert(
                "k",
                b"v2".to_vec(),
                String::new(),
                None,
                InsertMode::Overwrite,
                Some(gen + 1)
            )
            .is_err());
        assert!(store
            .insert(
                "k",
                b"v2".to_vec(),
                String::new(),
                None,
                InsertMode::Overwrite,
                Some(gen)
            )
            .is_ok());
    }

    #[test]
    fn append_and_prepend_modify_existing_body() {
        let store = KvStoreObj::new();
        store
            .insert("k", b"b".to_vec(), String::new(), None, InsertMode::Overwrite, None)
            .unwrap();
        store
            .insert("k", b"c".to_vec(), String::new(), None, InsertMode::Append, None)
            .unwrap();
        assert_eq!(store.lookup("k").unwrap().body, b"bc");
        store
            .insert("k", b"a".to_vec(), String::new(), None, InsertMode::Prepend, None)
            .unwrap();
        assert_eq!(store.lookup("k").unwrap().body, b"abc");
    }

    #[test]
    fn delete_is_idempotent() {
        let store = KvStoreObj::new();
        store.delete("missing");
        store
            .insert("k", b"v".to_vec(), String::new(), None, InsertMode::Overwrite, None)
            .unwrap();
        store.delete("k");
        store.delete("k");
        assert!(store.lookup("k").is_none());
    }

    #[test]
    fn list_respects_prefix_and_limit() {
        let store = KvStoreObj::new();
        for k in ["a/1", "a/2", "a/3", "b/1"] {
            store
                .insert(k, b"v".to_vec(), String::new(), None, InsertMode::Overwrite, None)
                .unwrap();
        }
        let (keys, cursor) = store.list("a/", Some(2), None).unwrap();
        assert_eq!(keys, vec!["a/1".to_string(), "a/2".to_string()]);
        assert!(cursor.is_some());
        let (keys2, cursor2) = store.list("a/", Some(2), cursor.as_deref()).unwrap();
        assert_eq!(keys2, vec!["a/3".to_string()]);
        assert!(cursor2.is_none());
    }

    #[test]
    fn reserved_key_names_are_rejected() {
        assert!(validate_key(".").is_err());
        assert!(validate_key("..").is_err());
        assert!(validate_key(".well-known/acme-challenge/x").is_err());
        assert!(validate_key("has\nnewline").is_err());
        assert!(validate_key("ok-key").is_ok());
    }
}
