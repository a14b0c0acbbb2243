//! Reader-side reassembly with ordered reveal
//!
//! Glyphs may arrive in any order, but only the contiguous verified
//! prefix is ever exposed: a glyph is accepted after its digest matches
//! the hash list, buffered until every lower index is present, then
//! revealed: decrypted at its absolute stream offset and fed through the
//! streaming inflater. The readable text therefore grows monotonically
//! and is always a valid prefix of the final document, never a sparse or
//! unverified fragment.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::cipher::ScrollCipher;
use crate::codec::{CodecError, Inflater};
use crate::hasher::Hasher;
use crate::hashlist::{HashList, HashListError};

#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Integrity(#[from] HashListError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("reassembled content is not valid UTF-8")]
    Utf8,

    #[error("reassembly incomplete: {revealed} of {total} glyphs revealed")]
    Incomplete { revealed: u32, total: u32 },
}

/// Mutable state of one in-progress retrieval.
pub struct ReassemblyState {
    story_id: String,
    hash_list: HashList,
    total: u32,
    /// Verified glyphs waiting for their predecessors.
    buffered: HashMap<u32, Vec<u8>>,
    /// Next glyph index to reveal; everything below is revealed.
    next_reveal: u32,
    /// Post-cipher bytes revealed so far, which is the cipher offset.
    revealed_bytes: usize,
    cipher: ScrollCipher,
    inflater: Inflater,
    /// Decompressed plaintext accumulated so far.
    plain: Vec<u8>,
    /// Verified glyph count (buffered + revealed).
    loaded: u32,
}

impl ReassemblyState {
    pub fn new(story_id: &str, hash_list: HashList, cipher: ScrollCipher) -> Self {
        let total = hash_list.len();
        Self {
            story_id: story_id.to_string(),
            hash_list,
            total,
            buffered: HashMap::new(),
            next_reveal: 0,
            revealed_bytes: 0,
            cipher,
            inflater: Inflater::new(),
            plain: Vec::new(),
            loaded: 0,
        }
    }

    /// Verify a received glyph and fold it into the reveal buffer.
    ///
    /// Accepting a duplicate of an already-verified index is a no-op.
    /// Verification failure leaves the state untouched; the caller may
    /// refetch and try again.
    pub fn accept(
        &mut self,
        index: u32,
        bytes: Vec<u8>,
        hasher: &dyn Hasher,
    ) -> Result<(), ReassemblyError> {
        if index < self.next_reveal || self.buffered.contains_key(&index) {
            trace!(story_id = %self.story_id, index, "duplicate glyph ignored");
            return Ok(());
        }

        self.hash_list.verify(index, &bytes, hasher)?;
        self.buffered.insert(index, bytes);
        self.loaded += 1;

        // Reveal every glyph that just became contiguous.
        while let Some(payload) = self.buffered.remove(&self.next_reveal) {
            let decrypted = self.cipher.decrypt_at(self.revealed_bytes, &payload);
            let inflated = self.inflater.push(&decrypted)?;
            self.plain.extend_from_slice(&inflated);
            self.revealed_bytes += payload.len();
            self.next_reveal += 1;
            trace!(
                story_id = %self.story_id,
                index = self.next_reveal - 1,
                plain_len = self.plain.len(),
                "glyph revealed"
            );
        }

        Ok(())
    }

    pub fn loaded(&self) -> u32 {
        self.loaded
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        self.next_reveal == self.total
    }

    /// The readable text so far: the longest valid UTF-8 prefix of the
    /// decompressed stream. Cheap, read-only, safe to call at any point.
    pub fn text_so_far(&self) -> &str {
        match std::str::from_utf8(&self.plain) {
            Ok(s) => s,
            // A multi-byte character split across the stream boundary.
            Err(e) => std::str::from_utf8(&self.plain[..e.valid_up_to()]).unwrap(),
        }
    }

    /// Flush the inflater and hand back the complete document.
    pub fn finish(&mut self) -> Result<String, ReassemblyError> {
        if !self.is_complete() {
            return Err(ReassemblyError::Incomplete {
                revealed: self.next_reveal,
                total: self.total,
            });
        }

        let tail = self.inflater.finish()?;
        self.plain.extend_from_slice(&tail);

        debug!(story_id = %self.story_id, bytes = self.plain.len(), "reassembly complete");
        String::from_utf8(std::mem::take(&mut self.plain)).map_err(|_| ReassemblyError::Utf8)
    }
}
