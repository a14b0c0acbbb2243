//! Protocol configuration
//!
//! Defaults work out of the box; embedders can override via TOML. The
//! usable glyph size is always derived from the ledger payload bound
//! minus the envelope overhead. It is not independently settable, so a
//! misconfigured chunk size can never overflow a transaction.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cipher::DEFAULT_KEY;
use crate::envelope::ENVELOPE_OVERHEAD;
use crate::hasher::DIGEST_HEX_LEN;
use crate::ledger::LedgerError;

/// Default per-transaction payload bound, roughly one chain transaction.
pub const DEFAULT_MAX_TX_PAYLOAD: usize = 1232;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Bounded retry with backoff for transient ledger failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per chunk before giving up on it.
    pub max_attempts: u32,
    /// Backoff after a network failure, doubled per attempt.
    pub base_backoff_ms: u64,
    /// Backoff after a rate-limit response, doubled per attempt.
    pub rate_limit_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            rate_limit_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), doubling per
    /// attempt and capped at 8x the base.
    pub fn backoff_for(&self, error: &LedgerError, attempt: u32) -> Duration {
        let base = match error {
            LedgerError::RateLimit(_) => self.rate_limit_backoff_ms,
            _ => self.base_backoff_ms,
        };
        let factor = 1u64 << attempt.saturating_sub(1).min(3);
        Duration::from_millis(base.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Ledger payload bound per transaction, in bytes.
    pub max_tx_payload: usize,
    /// Shared obfuscation key.
    pub cipher_key: Vec<u8>,
    pub retry: RetryPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_tx_payload: DEFAULT_MAX_TX_PAYLOAD,
            cipher_key: DEFAULT_KEY.to_vec(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProtocolConfig {
    /// Config for a ledger with the given payload bound.
    pub fn for_max_payload(max_tx_payload: usize) -> Self {
        Self {
            max_tx_payload,
            ..Self::default()
        }
    }

    /// Usable content bytes per glyph once envelope metadata is paid for.
    pub fn glyph_size(&self) -> usize {
        self.max_tx_payload - ENVELOPE_OVERHEAD
    }

    /// Digests per hash-list chunk at the same payload bound.
    pub fn digests_per_chunk(&self) -> usize {
        self.glyph_size() / DIGEST_HEX_LEN
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tx_payload <= ENVELOPE_OVERHEAD {
            return Err(ConfigError::Invalid(format!(
                "max_tx_payload {} does not cover the {}-byte envelope overhead",
                self.max_tx_payload, ENVELOPE_OVERHEAD
            )));
        }
        if self.glyph_size() < DIGEST_HEX_LEN {
            return Err(ConfigError::Invalid(format!(
                "glyph size {} cannot hold a single {}-byte digest",
                self.glyph_size(),
                DIGEST_HEX_LEN
            )));
        }
        if self.cipher_key.is_empty() {
            return Err(ConfigError::Invalid("cipher key must not be empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
