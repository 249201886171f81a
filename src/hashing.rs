//! Hashing - SHA-256 and canonical JSON
//!
//! Signed content hashes and artifact keys must be reproducible from stored
//! data alone, so nothing time-dependent ever enters a hashed payload.

use serde::Serialize;
use serde_json::{to_vec, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical JSON bytes: sorted keys, no whitespace
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_vec(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Content hash signed by digital signatures.
/// content_hash = sha256(entity_id + "\n" + original_bytes)
pub fn content_hash(entity_id: &Uuid, original: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_id.as_hyphenated().to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(original);
    hex::encode(hasher.finalize())
}

/// First `len` hex characters of a digest, for display.
pub fn short_hash(hash: &str, len: usize) -> &str {
    match hash.char_indices().nth(len) {
        Some((idx, _)) => &hash[..idx],
        None => hash,
    }
}
