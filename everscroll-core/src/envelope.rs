//! Wire envelope for chunk transactions
//!
//! Hash-list and content chunks are submitted to the ledger wrapped in a
//! small bincode envelope carrying the story id, chunk kind, and index, so
//! a payload read back from the ledger is self-describing. The manifest
//! root is the exception: it travels as bare JSON (see `manifest.rs`) and
//! is addressed directly by its transaction reference.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes reserved for envelope metadata when deriving the usable glyph
/// size from the ledger's max payload: kind tag, index, two length
/// prefixes, and a story id of up to 64 bytes.
pub const ENVELOPE_OVERHEAD: usize = 96;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope encode failed: {0}")]
    Encode(String),

    #[error("envelope decode failed: {0}")]
    Decode(String),

    #[error("envelope kind mismatch: expected {expected}, got {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("story id {0:?} exceeds the envelope budget")]
    StoryIdTooLong(String),
}

/// What a chunk transaction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    HashList,
    Content,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::HashList => "hash-list",
            EnvelopeKind::Content => "content",
        }
    }
}

/// One chunk transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub story_id: String,
    pub kind: EnvelopeKind,
    pub index: u32,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(story_id: &str, kind: EnvelopeKind, index: u32, payload: Vec<u8>) -> Self {
        Self {
            story_id: story_id.to_string(),
            kind,
            index,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        if self.story_id.len() > 64 {
            return Err(EnvelopeError::StoryIdTooLong(self.story_id.clone()));
        }
        bincode::serialize(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        bincode::deserialize(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }

    /// Decode and insist on a particular kind. Reading a content chunk
    /// where a hash-list chunk was expected is a protocol error, not data.
    pub fn decode_expecting(bytes: &[u8], kind: EnvelopeKind) -> Result<Self, EnvelopeError> {
        let envelope = Self::decode(bytes)?;
        if envelope.kind != kind {
            return Err(EnvelopeError::KindMismatch {
                expected: kind.as_str(),
                found: envelope.kind.as_str(),
            });
        }
        Ok(envelope)
    }
}
