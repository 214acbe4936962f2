//! The two-level `SecretStore`/`Secret` domain objects and the `xqd_secret_*` ABI surface
//! (§4.10). Grounded on the teacher's `secret_store.rs`, inverted from a guest-side client
//! (`SecretStoreHandle::open`/`get` hostcalls) to the host-side store those hostcalls would
//! have talked to.

use std::collections::HashMap;

use bytes::Bytes;

/// One named secret store: a flat map from secret name to plaintext bytes.
#[derive(Default, Clone)]
pub struct SecretStoreObj {
    secrets: HashMap<String, Bytes>,
}

impl SecretStoreObj {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, plaintext: impl Into<Bytes>) -> Self {
        self.secrets.insert(name.into(), plaintext.into());
        self
    }

    /// `secret_store_get`: `None` if no secret by that name exists in the store.
    pub fn get(&self, name: &str) -> Option<SecretObj> {
        self.secrets.get(name).map(|plaintext| SecretObj {
            plaintext: plaintext.clone(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.secrets.contains_key(name)
    }
}

/// A resolved secret handle. Plaintext is never inlined into the `get` result at the ABI
/// boundary; the guest must make a second `secret_plaintext` call, per §4.10.
#[derive(Clone)]
pub struct SecretObj {
    plaintext: Bytes,
}

impl SecretObj {
    /// `secret_from_bytes`: wraps guest-supplied bytes directly, bypassing a named store.
    pub fn from_bytes(plaintext: impl Into<Bytes>) -> Self {
        Self {
            plaintext: plaintext.into(),
        }
    }

    /// `secret_plaintext`.
    pub fn plaintext(&self) -> &Bytes {
        &self.plaintext
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_for_unknown_name() {
        let store = SecretStoreObj::new().with_secret("api-key", "s3cr3t");
        assert!(store.get("other").is_none());
        assert_eq!(store.get("api-key").unwrap().plaintext(), "s3cr3t");
    }

    #[test]
    fn from_bytes_does_not_require_a_store() {
        let secret = SecretObj::from_bytes(b"raw".to_vec());
        assert_eq!(secret.plaintext(), &Bytes::from_static(b"raw"));
    }
}
