// workbridge-core/src/hashing.rs
// ============================================================================
// Module: Fingerprinting
// Description: Canonical JSON fingerprints for cache and dedup keys.
// Purpose: Provide deterministic keys over tool names and argument bindings.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Cache entries and idempotency markers are keyed by a SHA-256 digest over
//! canonical JSON (RFC 8785, sorted object keys). Two invocations with the
//! same tool name and semantically identical arguments always produce the
//! same fingerprint regardless of argument ordering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while computing fingerprints.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`FingerprintError::Canonicalization`] when serialization fails.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, FingerprintError> {
    serde_jcs::to_vec(value).map_err(|err| FingerprintError::Canonicalization(err.to_string()))
}

/// Computes the lowercase hex SHA-256 fingerprint of a scope and value.
///
/// The scope (tool name, marker family) is folded into the digest so distinct
/// key spaces never collide on identical argument payloads.
///
/// # Errors
///
/// Returns [`FingerprintError::Canonicalization`] when serialization fails.
pub fn fingerprint<T: Serialize + ?Sized>(
    scope: &str,
    value: &T,
) -> Result<String, FingerprintError> {
    let bytes = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(&bytes);
    Ok(hex_encode(&hasher.finalize()))
}

/// Encodes bytes as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let hi = usize::from(byte >> 4);
        let lo = usize::from(byte & 0x0f);
        out.push(char::from(HEX[hi]));
        out.push(char::from(HEX[lo]));
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::canonical_json;
    use super::fingerprint;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let value = json!({"zebra": 1, "apple": {"inner_b": 2, "inner_a": 3}});
        let bytes = canonical_json(&value).expect("canonical json");
        let text = String::from_utf8(bytes).expect("utf-8");
        assert_eq!(text, r#"{"apple":{"inner_a":3,"inner_b":2},"zebra":1}"#);
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let first = json!({"project_id": "P1", "status": "open"});
        let second = json!({"status": "open", "project_id": "P1"});
        let left = fingerprint("listTasks", &first).expect("fingerprint");
        let right = fingerprint("listTasks", &second).expect("fingerprint");
        assert_eq!(left, right);
    }

    #[test]
    fn fingerprint_separates_scopes() {
        let args = json!({"project_id": "P1"});
        let left = fingerprint("listTasks", &args).expect("fingerprint");
        let right = fingerprint("getProjectSummary", &args).expect("fingerprint");
        assert_ne!(left, right);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let digest = fingerprint("tool", &json!({})).expect("fingerprint");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
