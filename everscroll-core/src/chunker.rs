//! Splitting a published byte stream into fixed-size glyphs
//!
//! A glyph is one ledger-transaction-sized unit of a story. Splitting is
//! deterministic and lossless: `join(split(b, n)) == b` for any chunk
//! size, with the final glyph allowed to run short.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("incomplete glyph set: expected index {expected}, found {found}")]
    IncompleteData { expected: u32, found: u32 },
}

/// One fixed-size content chunk of a published stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glyph {
    pub index: u32,
    pub payload: Vec<u8>,
}

impl Glyph {
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Number of glyphs a stream of `len` bytes splits into.
pub fn glyph_count(len: usize, chunk_size: usize) -> u32 {
    len.div_ceil(chunk_size) as u32
}

/// Split a byte stream into ordered fixed-size glyphs.
///
/// The final glyph may be shorter than `chunk_size`. An empty stream
/// produces no glyphs.
pub fn split(data: &[u8], chunk_size: usize) -> Vec<Glyph> {
    assert!(chunk_size > 0, "chunk_size must be greater than 0");

    data.chunks(chunk_size)
        .enumerate()
        .map(|(index, payload)| Glyph {
            index: index as u32,
            payload: payload.to_vec(),
        })
        .collect()
}

/// Reassemble the original byte stream from a complete, in-order glyph set.
///
/// Fails with [`ChunkerError::IncompleteData`] if any index is missing,
/// duplicated, or out of order, since joining a partial story would
/// silently corrupt it.
pub fn join(glyphs: &[Glyph]) -> Result<Vec<u8>, ChunkerError> {
    let mut out = Vec::with_capacity(glyphs.iter().map(Glyph::size).sum());

    for (expected, glyph) in glyphs.iter().enumerate() {
        if glyph.index != expected as u32 {
            return Err(ChunkerError::IncompleteData {
                expected: expected as u32,
                found: glyph.index,
            });
        }
        out.extend_from_slice(&glyph.payload);
    }

    Ok(out)
}
