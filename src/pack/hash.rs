//! Content digests for archives.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Lowercase hex SHA-256 of `bytes` (64 characters, no prefix).
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn file_digest(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(content_digest(&bytes))
}

/// True when `value` has the shape of a digest: exactly 64 hex digits, any case.
pub fn is_digest(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Digest equality ignoring hex case.
pub fn digests_match(declared: &str, actual: &str) -> bool {
    declared.eq_ignore_ascii_case(actual)
}
