//! Content Digest Module
//!
//! The primary store validates every upload against a SHA-1 digest of the
//! received bytes and rejects mismatches, so the digest must be computed over
//! the exact buffered payload that is sent.

use sha1::{Digest, Sha1};

/// Compute the lowercase hex SHA-1 digest of a buffered payload.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
