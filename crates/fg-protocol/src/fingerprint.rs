//! Content-sensitive deduplication fingerprints.
//!
//! A fingerprint is derived from (kind, primary_id, payload) only.  The
//! event-level timestamp is deliberately excluded so that a resent frame
//! with a fresh timestamp still dedupes, while a genuine content change
//! (edited text, new metrics) produces a new key and is not suppressed.

use crate::{EventKind, Payload};
use sha2::{Digest, Sha256};

/// Field separator inside the hash input.  Prevents ambiguous
/// concatenations such as ("ab", "c") vs ("a", "bc").
const SEP: [u8; 1] = [0x1f];

/// Compute the deduplication key for an event's identifying content.
///
/// The payload is serialized with `serde_json`, whose map representation
/// orders keys deterministically, so equal payloads always serialize to
/// equal byte strings.  The result is the hex form of the first 16 bytes
/// of a SHA-256 digest: short enough for log lines, wide enough that
/// collisions are not a practical concern for a TTL-bounded cache.
pub fn fingerprint(kind: EventKind, primary_id: &str, payload: &Payload) -> String {
    let canonical = canonical_payload(payload);
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(SEP);
    hasher.update(primary_id.as_bytes());
    hasher.update(SEP);
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Stable canonical serialization of a payload.
///
/// Round-trips through `serde_json::Value` so optional fields that are
/// skipped on serialization never contribute, and map keys come out in
/// sorted order regardless of struct field order.
fn canonical_payload(payload: &Payload) -> String {
    match serde_json::to_value(payload) {
        Ok(value) => value.to_string(),
        // Payload contains only JSON-representable types; this arm is
        // unreachable in practice but must not panic the pipeline.
        Err(_) => String::new(),
    }
}
