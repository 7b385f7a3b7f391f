//! Hashing System - SHA-256 Snapshot Digests
//!
//! The digest of a submission snapshot travels with the request as its
//! idempotency key, so a collaborator can recognize a duplicate.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

/// JSON with object keys in byte order and no whitespace.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&with_sorted_keys(serde_json::to_value(value)?))
}

fn with_sorted_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            entries
                .into_iter()
                .map(|(key, inner)| (key, with_sorted_keys(inner)))
                .collect::<serde_json::Map<_, _>>()
                .into()
        }
        Value::Array(items) => items.into_iter().map(with_sorted_keys).collect(),
        other => other,
    }
}

/// sha256 over `form_id:form_version:canonical_snapshot:engine_version`.
pub fn snapshot_digest(
    form_id: &str,
    form_version: &str,
    snapshot: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(snapshot)?;
    let combined = format!("{}:{}:{}:{}", form_id, form_version, canonical, engine_version);
    Ok(sha256_hex(combined.as_bytes()))
}
