//! Manifest root and publication package assembly
//!
//! Publishing is "blueprint first, fill second": the whole package
//! (manifest root, hash-list chunks, content glyphs, summary) is built in
//! memory before a single byte is submitted, so the structure is fixed up
//! front and a publish can resume from any interruption point.
//!
//! The manifest root is the one structure a reader fetches first. It
//! travels as JSON (the wire shape below) and is submitted **last**,
//! because it embeds the transaction references of every chunk confirmed
//! before it; its own transaction reference is the story's address.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::chunker::{split, Glyph};
use crate::cipher::{CipherError, ScrollCipher};
use crate::codec::{compress, CodecError, CompressionStats};
use crate::config::{ConfigError, ProtocolConfig};
use crate::hasher::Hasher;
use crate::hashlist::{HashList, HashListChunk};
use crate::ledger::TransactionRef;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Top-level commitment binding a story's identity to its hash list.
///
/// Wire shape (JSON, camelCase) is part of the protocol: readers on any
/// stack must be able to parse a root fetched from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRoot {
    pub story_id: String,
    pub title: String,
    pub author: String,
    pub author_public_key: String,
    pub total_chunks: u32,
    pub total_hash_list_chunks: u32,
    pub manifest_root_hash: String,
    /// Unix seconds at publish time.
    pub timestamp: u64,
    /// Content chunk references, in glyph index order.
    pub chunks: Vec<TransactionRef>,
    /// Hash-list chunk references, in chunk index order.
    pub hash_list_chunks: Vec<TransactionRef>,
}

impl ManifestRoot {
    pub fn new(
        story_id: &str,
        title: &str,
        author: &str,
        author_public_key: &str,
        total_chunks: u32,
        total_hash_list_chunks: u32,
        manifest_root_hash: &str,
    ) -> Self {
        Self {
            story_id: story_id.to_string(),
            title: title.to_string(),
            author: author.to_string(),
            author_public_key: author_public_key.to_string(),
            total_chunks,
            total_hash_list_chunks,
            manifest_root_hash: manifest_root_hash.to_string(),
            timestamp: unix_timestamp(),
            chunks: Vec::new(),
            hash_list_chunks: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a root fetched from the ledger, checking the reference lists
    /// agree with the declared totals.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_slice(bytes)?;

        if manifest.chunks.len() as u32 != manifest.total_chunks {
            return Err(ManifestError::Invalid(format!(
                "{} chunk refs but totalChunks = {}",
                manifest.chunks.len(),
                manifest.total_chunks
            )));
        }
        if manifest.hash_list_chunks.len() as u32 != manifest.total_hash_list_chunks {
            return Err(ManifestError::Invalid(format!(
                "{} hash-list refs but totalHashListChunks = {}",
                manifest.hash_list_chunks.len(),
                manifest.total_hash_list_chunks
            )));
        }
        Ok(manifest)
    }
}

/// Publication statistics reported back to the writer. Published byte
/// count determines ledger cost, so the savings are a required output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PublicationSummary {
    pub original_bytes: usize,
    pub published_bytes: usize,
    pub bytes_saved: usize,
    pub percent_saved: f64,
    pub total_glyphs: u32,
    pub total_hash_list_chunks: u32,
}

/// The fully assembled in-memory publication, built before any ledger
/// write. Confirmed transaction references accumulate in place, which is
/// what makes an interrupted publish resumable without duplicating work.
#[derive(Debug, Clone)]
pub struct PublicationPackage {
    pub manifest: ManifestRoot,
    pub hash_list_chunks: Vec<HashListChunk>,
    pub glyphs: Vec<Glyph>,
    pub summary: PublicationSummary,
    /// Confirmed ref per hash-list chunk, filled during publish.
    pub hash_list_refs: Vec<Option<TransactionRef>>,
    /// Confirmed ref per glyph, filled during publish.
    pub glyph_refs: Vec<Option<TransactionRef>>,
    /// Root transaction, set when the publish completes.
    pub root_ref: Option<TransactionRef>,
}

impl PublicationPackage {
    pub fn confirmed_glyphs(&self) -> u32 {
        self.glyph_refs.iter().filter(|r| r.is_some()).count() as u32
    }

    pub fn confirmed_hash_list_chunks(&self) -> u32 {
        self.hash_list_refs.iter().filter(|r| r.is_some()).count() as u32
    }

    pub fn is_fully_submitted(&self) -> bool {
        self.root_ref.is_some()
    }
}

/// Story metadata supplied by the writer.
#[derive(Debug, Clone)]
pub struct StoryMeta {
    /// Caller-chosen story id; generated when `None`.
    pub story_id: Option<String>,
    pub title: String,
    pub author: String,
    pub author_public_key: String,
}

/// Assembles [`PublicationPackage`]s: codec → cipher → chunker →
/// hash list → manifest root, all before any ledger traffic.
pub struct PackageBuilder {
    config: ProtocolConfig,
    cipher: ScrollCipher,
}

impl PackageBuilder {
    pub fn new(config: ProtocolConfig) -> Result<Self, PackageError> {
        config.validate()?;
        let cipher = ScrollCipher::new(&config.cipher_key)?;
        Ok(Self { config, cipher })
    }

    pub fn build(
        &self,
        meta: &StoryMeta,
        text: &str,
        hasher: &dyn Hasher,
    ) -> Result<PublicationPackage, PackageError> {
        let story_id = meta
            .story_id
            .clone()
            .unwrap_or_else(|| format!("scroll-{:016x}", rand::random::<u64>()));

        let compressed = compress(text.as_bytes())?;
        let published = self.cipher.encrypt(&compressed);
        let stats = CompressionStats::measure(text.len(), published.len());

        let glyphs = split(&published, self.config.glyph_size());
        let hash_list = HashList::from_glyphs(&glyphs, hasher);
        let hash_list_chunks = hash_list.to_chunks(self.config.digests_per_chunk());
        let root_hash = HashList::root_hash(&hash_list_chunks, hasher);

        let manifest = ManifestRoot::new(
            &story_id,
            &meta.title,
            &meta.author,
            &meta.author_public_key,
            glyphs.len() as u32,
            hash_list_chunks.len() as u32,
            &root_hash,
        );

        let summary = PublicationSummary {
            original_bytes: stats.original_bytes,
            published_bytes: stats.published_bytes,
            bytes_saved: stats.bytes_saved,
            percent_saved: stats.percent_saved,
            total_glyphs: glyphs.len() as u32,
            total_hash_list_chunks: hash_list_chunks.len() as u32,
        };

        info!(
            %story_id,
            glyphs = summary.total_glyphs,
            hash_list_chunks = summary.total_hash_list_chunks,
            percent_saved = summary.percent_saved,
            "assembled publication package"
        );

        let glyph_count = glyphs.len();
        let hash_list_count = hash_list_chunks.len();

        Ok(PublicationPackage {
            manifest,
            hash_list_chunks,
            glyphs,
            summary,
            hash_list_refs: vec![None; hash_list_count],
            glyph_refs: vec![None; glyph_count],
            root_ref: None,
        })
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
