//! Content hashing.
//!
//! SHA-256 identifies payloads in listings, and its first eight bytes stand
//! in for the source hash of hash-based containers.

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub fn hash_hex(bytes: &[u8]) -> String {
    content_hash(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// 64-bit source hash stored in the header of hash-based containers.
pub fn source_hash(source: &[u8]) -> u64 {
    let digest = content_hash(source);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}
