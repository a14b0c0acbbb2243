//! Ledger collaborator interface
//!
//! The protocol treats the chain as an opaque append-only transaction log:
//! submit a payload, get back a reference; read a reference, get back the
//! payload. Transaction submission/confirmation mechanics, fees, and
//! wallet handling all live behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Whether the operation is worth retrying with backoff.
    ///
    /// NotFound and Rejected are terminal for the item: the ledger is
    /// append-only, so a missing transaction will not appear later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Network(_) | LedgerError::RateLimit(_))
    }
}

/// Opaque reference to a confirmed ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRef(pub String);

impl TransactionRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity submitting transactions. Key custody is the wallet layer's
/// problem; the protocol only needs the public half for the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub public_key: String,
}

impl Signer {
    pub fn new(public_key: &str) -> Self {
        Self {
            public_key: public_key.to_string(),
        }
    }
}

/// Append-only transaction log with a bounded per-transaction payload.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit a payload; resolves once the transaction is confirmed.
    async fn submit(&self, payload: &[u8], signer: &Signer) -> Result<TransactionRef, LedgerError>;

    /// Read back the payload of a confirmed transaction.
    async fn read(&self, tx: &TransactionRef) -> Result<Vec<u8>, LedgerError>;

    /// Maximum payload size per transaction, in bytes. Glyph sizing is
    /// derived from this bound.
    fn max_payload(&self) -> usize;
}
