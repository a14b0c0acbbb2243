//! Per-glyph digest list and the manifest root commitment
//!
//! Every glyph's post-cipher bytes are digested; the ordered digest list
//! is itself a byte stream (fixed-width hex digests, no framing) that gets
//! split into hash-list chunks with the same chunker used for content.
//! Digests are far smaller than glyphs, so many pack into one chunk.
//!
//! The manifest root hash commits to the whole hash-list chunk set: it is
//! the digest of the concatenation of each chunk's own digest. A reader
//! holding the root can verify the hash list, and a reader holding the
//! hash list can verify every glyph.

use thiserror::Error;
use tracing::debug;

use crate::chunker::{self, Glyph};
use crate::hasher::{Hasher, DIGEST_HEX_LEN};

#[derive(Debug, Error)]
pub enum HashListError {
    #[error("integrity failure for glyph {index}: digest mismatch")]
    IntegrityFailure { index: u32 },

    #[error("glyph index {index} out of bounds (hash list has {total} entries)")]
    OutOfBounds { index: u32, total: u32 },

    #[error("malformed hash-list chunk {index}: {reason}")]
    MalformedChunk { index: u32, reason: String },

    #[error("hash list has {found} digests, manifest declares {expected}")]
    WrongCount { expected: u32, found: u32 },
}

pub type Result<T> = std::result::Result<T, HashListError>;

/// One ledger-sized slice of the ordered digest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashListChunk {
    pub index: u32,
    pub digests: Vec<String>,
}

impl HashListChunk {
    /// Serialize to the wire form: fixed-width hex digests, concatenated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.digests.len() * DIGEST_HEX_LEN);
        for digest in &self.digests {
            out.extend_from_slice(digest.as_bytes());
        }
        out
    }

    /// Parse a hash-list chunk from its wire bytes.
    pub fn from_bytes(index: u32, bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % DIGEST_HEX_LEN != 0 {
            return Err(HashListError::MalformedChunk {
                index,
                reason: format!("length {} is not a multiple of {}", bytes.len(), DIGEST_HEX_LEN),
            });
        }

        let mut digests = Vec::with_capacity(bytes.len() / DIGEST_HEX_LEN);
        for window in bytes.chunks(DIGEST_HEX_LEN) {
            let digest = std::str::from_utf8(window).map_err(|_| HashListError::MalformedChunk {
                index,
                reason: "digest is not valid UTF-8".to_string(),
            })?;
            if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(HashListError::MalformedChunk {
                    index,
                    reason: "digest is not hex".to_string(),
                });
            }
            digests.push(digest.to_string());
        }

        Ok(Self { index, digests })
    }
}

/// The complete ordered digest list for one story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashList {
    digests: Vec<String>,
}

impl HashList {
    /// Digest every glyph's (post-cipher) payload, in index order.
    pub fn from_glyphs(glyphs: &[Glyph], hasher: &dyn Hasher) -> Self {
        let digests = glyphs.iter().map(|g| hasher.hash(&g.payload)).collect();
        Self { digests }
    }

    pub fn len(&self) -> u32 {
        self.digests.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn digest(&self, index: u32) -> Option<&str> {
        self.digests.get(index as usize).map(String::as_str)
    }

    /// Verify one glyph's received bytes against the committed digest.
    pub fn verify(&self, index: u32, bytes: &[u8], hasher: &dyn Hasher) -> Result<()> {
        let expected = self
            .digests
            .get(index as usize)
            .ok_or(HashListError::OutOfBounds {
                index,
                total: self.len(),
            })?;

        let actual = hasher.hash(bytes);
        if &actual != expected {
            debug!(index, %expected, %actual, "glyph digest mismatch");
            return Err(HashListError::IntegrityFailure { index });
        }
        Ok(())
    }

    /// Split the digest list into ledger-sized chunks.
    ///
    /// The digest stream goes through the same chunker as content, sized
    /// to hold `digests_per_chunk` fixed-width digests per chunk.
    pub fn to_chunks(&self, digests_per_chunk: usize) -> Vec<HashListChunk> {
        assert!(digests_per_chunk > 0, "digests_per_chunk must be greater than 0");

        let mut stream = Vec::with_capacity(self.digests.len() * DIGEST_HEX_LEN);
        for digest in &self.digests {
            stream.extend_from_slice(digest.as_bytes());
        }

        chunker::split(&stream, digests_per_chunk * DIGEST_HEX_LEN)
            .into_iter()
            .map(|chunk| {
                HashListChunk::from_bytes(chunk.index, &chunk.payload)
                    .expect("chunked digest stream is well-formed")
            })
            .collect()
    }

    /// Rebuild the digest list from received chunks.
    ///
    /// Chunks must be complete and in index order; the reassembled count
    /// must match what the manifest declares.
    pub fn from_chunks(chunks: &[HashListChunk], expected_total: u32) -> Result<Self> {
        let mut digests = Vec::with_capacity(expected_total as usize);
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.index != expected as u32 {
                return Err(HashListError::MalformedChunk {
                    index: chunk.index,
                    reason: format!("expected chunk index {}", expected),
                });
            }
            digests.extend(chunk.digests.iter().cloned());
        }

        if digests.len() as u32 != expected_total {
            return Err(HashListError::WrongCount {
                expected: expected_total,
                found: digests.len() as u32,
            });
        }

        Ok(Self { digests })
    }

    /// Manifest root commitment over a hash-list chunk set.
    ///
    /// The digest of each chunk's wire bytes is computed, the digests are
    /// concatenated in chunk order, and the result is digested once more.
    pub fn root_hash(chunks: &[HashListChunk], hasher: &dyn Hasher) -> String {
        let mut concatenated = String::with_capacity(chunks.len() * DIGEST_HEX_LEN);
        for chunk in chunks {
            concatenated.push_str(&hasher.hash(&chunk.to_bytes()));
        }
        hasher.hash(concatenated.as_bytes())
    }
}
