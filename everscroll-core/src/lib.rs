//! Everscroll Core
//!
//! Chunked publication and progressive retrieval of long-form text over
//! an append-only ledger. Writers compress, obfuscate, and split a story
//! into glyphs, commit to them through a hash list, and publish a
//! three-phase manifest tree; readers fetch the manifest root, rebuild
//! the hash list, and reconstruct verified text progressively.

pub mod cache;
pub mod chunker;
pub mod cipher;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod hasher;
pub mod hashlist;
pub mod ledger;
pub mod manifest;
pub mod memory_ledger;
pub mod progress;
pub mod publisher;
pub mod reassembly;
pub mod retriever;

#[cfg(test)]
mod proptests;

pub use cache::{CacheStats, CachedStory, MemoryCache, StoryCache};
pub use chunker::{glyph_count, join, split, ChunkerError, Glyph};
pub use cipher::{CipherError, ScrollCipher, DEFAULT_KEY};
pub use codec::{compress, decompress, CodecError, CompressionStats, Inflater};
pub use config::{ConfigError, ProtocolConfig, RetryPolicy, DEFAULT_MAX_TX_PAYLOAD};
pub use envelope::{Envelope, EnvelopeError, EnvelopeKind, ENVELOPE_OVERHEAD};
pub use hasher::{sha256_hex, Hasher, Sha256Hasher, DIGEST_HEX_LEN};
pub use hashlist::{HashList, HashListChunk, HashListError};
pub use ledger::{Ledger, LedgerError, Signer, TransactionRef};
pub use manifest::{
    ManifestError, ManifestRoot, PackageBuilder, PackageError, PublicationPackage,
    PublicationSummary, StoryMeta,
};
pub use memory_ledger::MemoryLedger;
pub use progress::{CancelFlag, ProgressSnapshot, ProgressTracker};
pub use publisher::{PublishError, PublishResult, PublishStage, Publisher};
pub use reassembly::{ReassemblyError, ReassemblyState};
pub use retriever::{RetrieveError, RetrieveStage, RetrievedStory, Retriever, TextSnapshot};
