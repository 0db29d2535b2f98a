//! Content fingerprints for decisions, incidents and intake payloads.
//!
//! Values are serialised through `serde_json::Value` first, so object keys
//! come out sorted and the digest does not depend on struct field order.

use serde::Serialize;
use sha2::{Digest, Sha256};
use warden_types::WardenError;

/// Length of a decision's logic hash, in hex characters.
pub const LOGIC_HASH_LEN: usize = 32;

/// Length of the payload digest prefix kept in the audit journal.
pub const INPUT_HASH_LEN: usize = 16;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Full SHA-256 hex digest of the canonical JSON form of `value`.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String, WardenError> {
    let canonical = serde_json::to_value(value)
        .and_then(|v| serde_json::to_vec(&v))
        .map_err(|e| WardenError::Serialization(e.to_string()))?;
    Ok(sha256_hex(&canonical))
}

/// Truncated fingerprint stamped on every decision.
pub fn logic_hash<T: Serialize>(value: &T) -> Result<String, WardenError> {
    let mut full = fingerprint(value)?;
    full.truncate(LOGIC_HASH_LEN);
    Ok(full)
}

/// Short digest of an intake payload for the audit journal.
pub fn input_hash(payload: &str) -> String {
    let mut full = sha256_hex(payload.as_bytes());
    full.truncate(INPUT_HASH_LEN);
    full
}
