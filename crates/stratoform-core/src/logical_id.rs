//! Deterministic logical id generation
//!
//! Resources that must be *replaced* rather than updated in place (function
//! versions, layer versions, synthesized conditions) get an identity derived
//! from their defining content: `prefix + first 10 hex chars of
//! sha256(canonical JSON)`. The id changes if and only if the prefix or the
//! canonicalized structure changes, so repeated compilations of an unchanged
//! template always emit the same ids.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Number of hash characters appended to the prefix. Changing this breaks
/// the identity stability contract for every previously generated template.
pub const HASH_LENGTH: usize = 10;

#[derive(Debug, Clone)]
pub struct LogicalIdGenerator {
    prefix: String,
    data_str: String,
}

impl LogicalIdGenerator {
    /// Generator with no data: `generate()` returns the prefix alone.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            data_str: String::new(),
        }
    }

    /// Generator whose hash tracks the canonicalized `data`. A bare string
    /// hashes as its raw bytes; everything else is serialized as compact
    /// JSON with recursively sorted keys, so key order never affects the id.
    pub fn with_data(prefix: impl Into<String>, data: &Value) -> Self {
        Self {
            prefix: prefix.into(),
            data_str: stringify(data),
        }
    }

    /// Appends a salt to the hashed content. Two generators over the same
    /// structure but different salts produce different ids.
    pub fn salted(mut self, salt: &str) -> Self {
        self.data_str.push_str(salt);
        self
    }

    /// The stable logical id: `prefix + hash`. With no data this is just the
    /// prefix.
    pub fn generate(&self) -> String {
        format!("{}{}", self.prefix, self.hash(HASH_LENGTH))
    }

    /// Like [`generate`](Self::generate) but bounded to `max_len`
    /// characters. Truncation drops from the end of the hash suffix, never
    /// from the prefix, so the original id stays a recognizable prefix.
    pub fn generate_truncated(&self, max_len: usize) -> String {
        let mut id = self.generate();
        if id.len() > max_len {
            id.truncate(max_len.max(self.prefix.len()));
        }
        id
    }

    /// Hex hash of the data, truncated to `length`. Empty when the generator
    /// carries no data.
    pub fn hash(&self, length: usize) -> String {
        if self.data_str.is_empty() {
            return String::new();
        }
        let digest = Sha256::digest(self.data_str.as_bytes());
        let mut hash = hex::encode(digest);
        hash.truncate(length);
        hash
    }
}

/// Stable, language-independent stringification. Strings hash as-is; other
/// values as compact JSON with keys sorted at every level.
fn stringify(data: &Value) -> String {
    if let Value::String(s) = data {
        return s.clone();
    }
    serde_json::to_string(&sort_keys(data)).expect("JSON value always serializes")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_input_same_id() {
        let a = LogicalIdGenerator::with_data("V", &json!({ "a": 1 })).generate();
        let b = LogicalIdGenerator::with_data("V", &json!({ "a": 1 })).generate();
        assert_eq!(a, b);
        assert!(a.starts_with('V'));
        assert_eq!(a.len(), 1 + HASH_LENGTH);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = LogicalIdGenerator::with_data("V", &json!({ "a": 1, "b": 2 })).generate();
        let b = LogicalIdGenerator::with_data("V", &json!({ "b": 2, "a": 1 })).generate();
        assert_eq!(a, b);
    }

    #[test]
    fn test_changed_data_changes_id() {
        let a = LogicalIdGenerator::with_data("V", &json!({ "a": 1 })).generate();
        let b = LogicalIdGenerator::with_data("V", &json!({ "a": 2 })).generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_changes_id() {
        let base = LogicalIdGenerator::with_data("V", &json!({ "a": 1 }));
        let salted = base.clone().salted("extra");
        assert_ne!(base.generate(), salted.generate());
    }

    #[test]
    fn test_no_data_returns_prefix() {
        assert_eq!(LogicalIdGenerator::new("MyRole").generate(), "MyRole");
    }

    #[test]
    fn test_string_data_hashes_raw() {
        let a = LogicalIdGenerator::with_data("P", &json!("suffix")).generate();
        let b = LogicalIdGenerator::with_data("P", &json!("suffix")).generate();
        assert_eq!(a, b);
        assert_ne!(a, "P");
    }

    #[test]
    fn test_truncation_keeps_prefix() {
        let id = LogicalIdGenerator::with_data("LongPrefix", &json!({ "x": 1 }))
            .generate_truncated(14);
        assert_eq!(id.len(), 14);
        assert!(id.starts_with("LongPrefix"));
    }
}
