//! Keyed obfuscation transform for published bytes
//!
//! The ledger is public, so this is obfuscation rather than
//! confidentiality: a fixed short key shared between the writer and all
//! readers. The transform is position-dependent: each byte is combined
//! with the repeating key and its absolute stream offset, nibble-swapped,
//! then masked. A chunk can therefore only be decrypted when its starting
//! offset in the stream is known.
//!
//! Encrypt and decrypt apply the three steps in exactly inverse order;
//! the round trip is pinned by a property test in `proptests.rs`.

use thiserror::Error;

/// Default shared key. Writers and readers must agree on this value for a
/// story to be readable.
pub const DEFAULT_KEY: &[u8] = b"everscroll";

/// Constant mask applied as the final encrypt step.
const MASK: u8 = 0x5a;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("cipher key must not be empty")]
    EmptyKey,
}

/// Reversible keyed byte transform.
#[derive(Debug, Clone)]
pub struct ScrollCipher {
    key: Vec<u8>,
}

impl ScrollCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.is_empty() {
            return Err(CipherError::EmptyKey);
        }
        Ok(Self { key: key.to_vec() })
    }

    /// Cipher with the protocol's default shared key.
    pub fn with_default_key() -> Self {
        Self {
            key: DEFAULT_KEY.to_vec(),
        }
    }

    fn key_byte(&self, position: usize) -> u8 {
        self.key[position % self.key.len()] ^ (position & 0xff) as u8
    }

    /// Encrypt a full stream starting at offset 0.
    pub fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.encrypt_at(0, data)
    }

    /// Decrypt a full stream starting at offset 0.
    pub fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        self.decrypt_at(0, data)
    }

    /// Encrypt bytes that begin at the given absolute stream offset.
    pub fn encrypt_at(&self, offset: usize, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &b)| {
                let mixed = b ^ self.key_byte(offset + i);
                swap_nibbles(mixed) ^ MASK
            })
            .collect()
    }

    /// Decrypt bytes that begin at the given absolute stream offset.
    pub fn decrypt_at(&self, offset: usize, data: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, &b)| {
                let unmasked = swap_nibbles(b ^ MASK);
                unmasked ^ self.key_byte(offset + i)
            })
            .collect()
    }
}

#[inline]
fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}
