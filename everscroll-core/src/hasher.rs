//! Content-addressing primitive: bytes to fixed-length hex digest
//!
//! The protocol commits to glyph contents through a hash list of digests.
//! Hashing is a collaborator so readers and writers can agree on the
//! algorithm independently of the rest of the stack; the default is
//! SHA-256 rendered as lowercase hex.

use sha2::{Digest, Sha256};

/// Length of a hex-encoded SHA-256 digest in bytes.
///
/// Hash-list chunks pack digests at this fixed width, so the reader can
/// split a reassembled hash-list stream without any framing.
pub const DIGEST_HEX_LEN: usize = 64;

/// Content digest collaborator: bytes in, fixed-length hex string out.
///
/// Implementations must be pure and deterministic: the same bytes always
/// produce the same digest, on every machine.
pub trait Hasher: Send + Sync {
    fn hash(&self, data: &[u8]) -> String;
}

/// Default hasher: SHA-256, lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn hash(&self, data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

/// Hash bytes with the default algorithm.
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256Hasher.hash(data)
}
