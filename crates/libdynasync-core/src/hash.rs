//! Content hashing for baseline drift detection

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 of file content
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Whether `data` hashes to `expected`
pub fn matches_hash(data: &[u8], expected: &str) -> bool {
    content_hash(data).eq_ignore_ascii_case(expected)
}
