//! Content hashing of desired specs.
//!
//! The hash is stored in the `spechash` annotation after a successful sync
//! and compared on every reconcile to detect drift.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the canonical JSON form of `spec`.
///
/// Object keys are emitted in sorted order at every depth, so two specs
/// that differ only in key order hash identically.
#[must_use]
pub fn spec_hash(spec: &Value) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, spec);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn feed(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            hasher.update(b"{");
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                if let Some(inner) = map.get(key) {
                    feed(hasher, inner);
                }
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                feed(hasher, item);
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}
