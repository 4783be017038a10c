//! Session identity: a fingerprint of the payload plus a random suffix.

use rand::Rng;
use sha2::{Digest, Sha256};

use crate::payload::PayloadDescriptor;

use super::types::SessionId;

const FINGERPRINT_HEX: usize = 16;
const SUFFIX_HEX: usize = 8;

/// Stable 16-hex fingerprint of name, size, content type and modification time.
pub fn fingerprint(payload: &PayloadDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.size.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(payload.content_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.modified_ms.to_be_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(FINGERPRINT_HEX);
    hex
}

/// Fresh id for `payload`: fingerprint plus a random suffix so identical re-adds differ.
pub fn new_session_id(payload: &PayloadDescriptor) -> SessionId {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{:0width$x}", fingerprint(payload), suffix, width = SUFFIX_HEX)
}

/// Fingerprint part of a session id.
pub fn fingerprint_of(session_id: &str) -> &str {
    session_id
        .split_once('-')
        .map(|(fp, _)| fp)
        .unwrap_or(session_id)
}

/// Ids end up inside ledger keys, so they must not contain `:`.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
