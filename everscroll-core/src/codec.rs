//! DEFLATE compression for story payloads
//!
//! Published byte count determines ledger cost, so compression savings are
//! reported back to the caller as part of the publication summary. The
//! first byte of every compressed payload is a marker (0 = stored,
//! 1 = deflated): incompressible input is stored as-is instead of growing.
//!
//! [`Inflater`] is the streaming counterpart used during retrieval: it
//! accepts the published stream incrementally and yields whatever
//! decompressed output is available, which is what lets the retriever
//! expose a readable prefix while content chunks are still arriving.

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Read;
use thiserror::Error;

/// Marker byte: payload stored uncompressed.
const MARKER_STORED: u8 = 0;
/// Marker byte: payload is a raw deflate stream.
const MARKER_DEFLATED: u8 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("invalid codec marker byte: {0}")]
    InvalidMarker(u8),

    #[error("deflate stream is truncated")]
    Truncated,
}

/// Compress a payload, preferring DEFLATE but falling back to stored form
/// when compression does not help.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.is_empty() {
        return Ok(vec![MARKER_STORED]);
    }

    let mut encoder = DeflateEncoder::new(data, Compression::best());
    let mut deflated = Vec::new();
    encoder
        .read_to_end(&mut deflated)
        .map_err(|e| CodecError::Compress(e.to_string()))?;

    if deflated.len() < data.len() {
        let mut out = Vec::with_capacity(deflated.len() + 1);
        out.push(MARKER_DEFLATED);
        out.extend_from_slice(&deflated);
        Ok(out)
    } else {
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(MARKER_STORED);
        out.extend_from_slice(data);
        Ok(out)
    }
}

/// Decompress a payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let (marker, payload) = data
        .split_first()
        .ok_or(CodecError::Decompress("empty payload".to_string()))?;

    match *marker {
        MARKER_STORED => Ok(payload.to_vec()),
        MARKER_DEFLATED => {
            let mut decoder = DeflateDecoder::new(payload);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompress(e.to_string()))?;
            Ok(out)
        }
        m => Err(CodecError::InvalidMarker(m)),
    }
}

/// Compression savings for a publication, computed from byte counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionStats {
    pub original_bytes: usize,
    pub published_bytes: usize,
    pub bytes_saved: usize,
    pub percent_saved: f64,
}

impl CompressionStats {
    pub fn measure(original_bytes: usize, published_bytes: usize) -> Self {
        let bytes_saved = original_bytes.saturating_sub(published_bytes);
        let percent_saved = if original_bytes == 0 {
            0.0
        } else {
            bytes_saved as f64 * 100.0 / original_bytes as f64
        };
        Self {
            original_bytes,
            published_bytes,
            bytes_saved,
            percent_saved,
        }
    }
}

enum InflateMode {
    Stored,
    Deflated(Box<Decompress>),
}

/// Incremental decompressor for a stream produced by [`compress`].
///
/// Feed bytes in publication order with [`push`](Inflater::push); each call
/// returns the decompressed bytes that became available. Call
/// [`finish`](Inflater::finish) once the full stream has been fed to flush
/// the tail and check the stream actually ended.
pub struct Inflater {
    mode: Option<InflateMode>,
    ended: bool,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            mode: None,
            ended: false,
        }
    }

    /// Feed the next slice of the published stream.
    pub fn push(&mut self, mut input: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut produced = Vec::new();

        if self.mode.is_none() {
            let Some((marker, rest)) = input.split_first() else {
                return Ok(produced);
            };
            self.mode = Some(match *marker {
                MARKER_STORED => InflateMode::Stored,
                MARKER_DEFLATED => InflateMode::Deflated(Box::new(Decompress::new(false))),
                m => return Err(CodecError::InvalidMarker(m)),
            });
            input = rest;
        }

        match self.mode.as_mut().unwrap() {
            InflateMode::Stored => {
                produced.extend_from_slice(input);
                Ok(produced)
            }
            InflateMode::Deflated(inflate) => {
                while !input.is_empty() && !self.ended {
                    let before = inflate.total_in();
                    let mut out = Vec::with_capacity(32 * 1024);
                    let status = inflate
                        .decompress_vec(input, &mut out, FlushDecompress::None)
                        .map_err(|e| CodecError::Decompress(e.to_string()))?;

                    let consumed = (inflate.total_in() - before) as usize;
                    input = &input[consumed..];
                    produced.extend_from_slice(&out);

                    match status {
                        Status::StreamEnd => self.ended = true,
                        // No forward progress means the inflater needs more
                        // input than we have buffered right now.
                        _ if consumed == 0 && out.is_empty() => break,
                        _ => {}
                    }
                }
                Ok(produced)
            }
        }
    }

    /// Flush remaining output and verify the stream terminated cleanly.
    pub fn finish(&mut self) -> Result<Vec<u8>, CodecError> {
        match self.mode.as_mut() {
            // Only the marker byte was ever fed: original input was empty.
            None => Ok(Vec::new()),
            Some(InflateMode::Stored) => Ok(Vec::new()),
            Some(InflateMode::Deflated(inflate)) => {
                let mut produced = Vec::new();
                while !self.ended {
                    let mut out = Vec::with_capacity(32 * 1024);
                    let status = inflate
                        .decompress_vec(&[], &mut out, FlushDecompress::Finish)
                        .map_err(|e| CodecError::Decompress(e.to_string()))?;
                    produced.extend_from_slice(&out);
                    match status {
                        Status::StreamEnd => self.ended = true,
                        _ if out.is_empty() => return Err(CodecError::Truncated),
                        _ => {}
                    }
                }
                Ok(produced)
            }
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
