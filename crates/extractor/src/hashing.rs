use sha2::{Digest, Sha256};

/// Lowercase hex sha256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// First `len` hex characters of the sha256 of `text` (at most 64).
#[must_use]
pub fn hash_prefix(text: &str, len: usize) -> String {
    let mut digest = sha256_hex(text.as_bytes());
    digest.truncate(len);
    digest
}
