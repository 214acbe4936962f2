//! The `Dictionary` domain object and the `xqd_dictionary_*` ABI surface (§4.10).
//!
//! Dictionaries and config stores share the same open/get shape (§4.10); this module and
//! [`crate::config_store`] are deliberately near-duplicates of each other rather than one
//! generic type, mirroring how the teacher keeps `dictionary.rs` and `config_store.rs` as
//! separate (if nearly identical) modules after the product renamed one into the other.

use std::collections::HashMap;

/// One named dictionary: a flat, read-only string-to-string map populated at registry
/// construction time.
#[derive(Default, Clone)]
pub struct DictionaryObj {
    entries: HashMap<String, String>,
}

impl DictionaryObj {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// `dictionary_get`: an absent key and a key mapped to the empty string are both reported
    /// to the guest as "not found" per §4.10.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_value_is_reported_absent() {
        let mut entries = HashMap::new();
        entries.insert("present".to_string(), "value".to_string());
        entries.insert("blank".to_string(), String::new());
        let dict = DictionaryObj::new(entries);
        assert_eq!(dict.get("present"), Some("value"));
        assert_eq!(dict.get("blank"), None);
        assert_eq!(dict.get("missing"), None);
    }
}
