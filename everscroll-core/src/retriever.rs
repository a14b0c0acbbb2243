//! Progressive retrieval state machine
//!
//! One retriever per retrieval: it owns its reassembly state, progress
//! channel, and cancellation flag, scoped to a single story; there are
//! no ambient globals. The flow is cache check, manifest root (one read),
//! hash-list chunks (parallel, they are independent reads), then content
//! glyphs in index order with digest verification. `snapshot()` may be
//! called from any task at any time and returns the contiguous verified
//! prefix.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::StoryCache;
use crate::cipher::{CipherError, ScrollCipher};
use crate::config::ProtocolConfig;
use crate::envelope::{Envelope, EnvelopeError, EnvelopeKind};
use crate::hasher::{Hasher, Sha256Hasher};
use crate::hashlist::{HashList, HashListChunk, HashListError};
use crate::ledger::{Ledger, LedgerError, TransactionRef};
use crate::manifest::{ManifestError, ManifestRoot};
use crate::progress::{CancelFlag, ProgressSnapshot, ProgressTracker};
use crate::reassembly::{ReassemblyError, ReassemblyState};

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    HashList(#[from] HashListError),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("integrity failure for glyph {index}: digests diverge after {attempts} attempts")]
    Integrity { index: u32, attempts: u32 },

    #[error("hash list does not match the manifest root commitment")]
    RootMismatch,

    #[error("manifest is for story {found}, expected {expected}")]
    WrongStory { expected: String, found: String },

    #[error("retrieval cancelled")]
    Cancelled,
}

/// Retrieval state machine stages, reported through the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieveStage {
    Idle,
    FetchingManifest,
    FetchingHashlist,
    FetchingContent,
    Complete,
    Error,
    Cancelled,
}

/// A completed retrieval.
#[derive(Debug, Clone)]
pub struct RetrievedStory {
    pub manifest: ManifestRoot,
    pub text: String,
    pub from_cache: bool,
}

/// Point-in-time view of an in-progress retrieval.
#[derive(Debug, Clone)]
pub struct TextSnapshot {
    /// Contiguous verified prefix of the final document.
    pub text_so_far: String,
    pub is_complete: bool,
    pub progress: ProgressSnapshot<RetrieveStage>,
}

/// Drives one story's retrieval from ledger to verified text.
pub struct Retriever {
    ledger: Arc<dyn Ledger>,
    cache: Arc<dyn StoryCache>,
    hasher: Arc<dyn Hasher>,
    config: ProtocolConfig,
    progress: ProgressTracker<RetrieveStage>,
    cancel: CancelFlag,
    state: Mutex<Option<ReassemblyState>>,
}

impl Retriever {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        cache: Arc<dyn StoryCache>,
        config: ProtocolConfig,
    ) -> Self {
        Self::with_hasher(ledger, cache, config, Arc::new(Sha256Hasher))
    }

    pub fn with_hasher(
        ledger: Arc<dyn Ledger>,
        cache: Arc<dyn StoryCache>,
        config: ProtocolConfig,
        hasher: Arc<dyn Hasher>,
    ) -> Self {
        Self {
            ledger,
            cache,
            hasher,
            config,
            progress: ProgressTracker::new(RetrieveStage::Idle),
            cancel: CancelFlag::new(),
            state: Mutex::new(None),
        }
    }

    /// Subscribe to `{stage, current, total}` progress snapshots.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<ProgressSnapshot<RetrieveStage>> {
        self.progress.subscribe()
    }

    /// Request cancellation: no new ledger reads are issued, in-flight
    /// reads drain, the stage moves to `Cancelled`, and the cache is left
    /// untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Read-only snapshot of the text reconstructed so far. Safe to call
    /// concurrently with an in-progress [`retrieve`](Self::retrieve); the
    /// exposed text is always a verified, contiguous prefix.
    pub fn snapshot(&self) -> TextSnapshot {
        let progress = self.progress.latest();
        let state = self.state.lock().unwrap();
        match state.as_ref() {
            Some(s) => TextSnapshot {
                text_so_far: s.text_so_far().to_string(),
                is_complete: progress.stage == RetrieveStage::Complete,
                progress,
            },
            None => TextSnapshot {
                text_so_far: String::new(),
                is_complete: progress.stage == RetrieveStage::Complete,
                progress,
            },
        }
    }

    /// Fetch, verify, and reconstruct a story.
    ///
    /// The cache is consulted first; a hit skips the ledger entirely. On
    /// success the completed story is cached. On error or cancellation
    /// whatever verified prefix exists stays visible via [`snapshot`](Self::snapshot)
    /// and nothing is cached.
    pub async fn retrieve(
        &self,
        story_id: &str,
        root_ref: &TransactionRef,
    ) -> Result<RetrievedStory, RetrieveError> {
        match self.run(story_id, root_ref).await {
            Ok(story) => Ok(story),
            Err(RetrieveError::Cancelled) => {
                info!(story_id, "retrieval cancelled");
                self.progress.set_stage(RetrieveStage::Cancelled);
                Err(RetrieveError::Cancelled)
            }
            Err(e) => {
                warn!(story_id, %e, "retrieval failed");
                self.progress.set_stage(RetrieveStage::Error);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        story_id: &str,
        root_ref: &TransactionRef,
    ) -> Result<RetrievedStory, RetrieveError> {
        self.check_cancelled()?;

        if let Some(cached) = self.cache.get(story_id).await {
            info!(story_id, "cache hit, skipping ledger reads");
            self.progress.update(
                RetrieveStage::Complete,
                cached.manifest.total_chunks,
                cached.manifest.total_chunks,
            );
            return Ok(RetrievedStory {
                manifest: cached.manifest,
                text: cached.content,
                from_cache: true,
            });
        }

        // Stage 1: the manifest root, one read.
        self.progress.update(RetrieveStage::FetchingManifest, 0, 0);
        let root_bytes = self.read_with_retry(root_ref).await?;
        let manifest = ManifestRoot::from_json(&root_bytes)?;
        if manifest.story_id != story_id {
            return Err(RetrieveError::WrongStory {
                expected: story_id.to_string(),
                found: manifest.story_id,
            });
        }
        debug!(
            story_id,
            total_chunks = manifest.total_chunks,
            total_hash_list_chunks = manifest.total_hash_list_chunks,
            "manifest root fetched"
        );

        // Stage 2: hash-list chunks, fetched in parallel.
        let chunks = self.fetch_hash_list(story_id, &manifest).await?;

        // The received chunk set must match the root commitment before
        // any glyph is trusted against it.
        if HashList::root_hash(&chunks, self.hasher.as_ref()) != manifest.manifest_root_hash {
            return Err(RetrieveError::RootMismatch);
        }
        let hash_list = HashList::from_chunks(&chunks, manifest.total_chunks)?;

        // Stage 3: content glyphs, verified and revealed in order.
        let cipher = ScrollCipher::new(&self.config.cipher_key)?;
        *self.state.lock().unwrap() = Some(ReassemblyState::new(story_id, hash_list, cipher));

        self.progress
            .update(RetrieveStage::FetchingContent, 0, manifest.total_chunks);
        self.fetch_content(story_id, &manifest).await?;

        let text = {
            let mut state = self.state.lock().unwrap();
            state.as_mut().expect("state initialized above").finish()?
        };

        self.progress.update(
            RetrieveStage::Complete,
            manifest.total_chunks,
            manifest.total_chunks,
        );
        info!(story_id, bytes = text.len(), "retrieval complete");

        self.cache
            .put(story_id, manifest.clone(), text.clone())
            .await;

        Ok(RetrievedStory {
            manifest,
            text,
            from_cache: false,
        })
    }

    async fn fetch_hash_list(
        &self,
        story_id: &str,
        manifest: &ManifestRoot,
    ) -> Result<Vec<HashListChunk>, RetrieveError> {
        let total = manifest.total_hash_list_chunks;
        self.progress.update(RetrieveStage::FetchingHashlist, 0, total);

        let fetched = Arc::new(AtomicU32::new(0));
        let reads = manifest
            .hash_list_chunks
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                let fetched = Arc::clone(&fetched);
                async move {
                    self.check_cancelled()?;
                    let bytes = self.read_with_retry(tx).await?;
                    let envelope = Envelope::decode_expecting(&bytes, EnvelopeKind::HashList)?;
                    if envelope.story_id != story_id || envelope.index != i as u32 {
                        return Err(RetrieveError::Manifest(ManifestError::Invalid(format!(
                            "hash-list ref {} resolved to story {} chunk {}",
                            i, envelope.story_id, envelope.index
                        ))));
                    }
                    let chunk = HashListChunk::from_bytes(envelope.index, &envelope.payload)?;
                    let done = fetched.fetch_add(1, Ordering::SeqCst) + 1;
                    self.progress.update(RetrieveStage::FetchingHashlist, done, total);
                    Ok::<HashListChunk, RetrieveError>(chunk)
                }
            });

        // try_join_all yields results in input order regardless of
        // completion order, so the chunk set comes back index-sorted.
        Ok(try_join_all(reads).await?)
    }

    async fn fetch_content(
        &self,
        story_id: &str,
        manifest: &ManifestRoot,
    ) -> Result<(), RetrieveError> {
        let policy = &self.config.retry;
        let total = manifest.total_chunks;

        for (i, tx) in manifest.chunks.iter().enumerate() {
            let index = i as u32;
            let mut attempt = 1;

            loop {
                self.check_cancelled()?;

                let result = self.fetch_one_glyph(story_id, index, tx).await;
                match result {
                    Ok(()) => break,
                    Err(e @ RetrieveError::Reassembly(ReassemblyError::Integrity(_)))
                    | Err(e @ RetrieveError::Ledger(_))
                        if attempt < policy.max_attempts && is_retryable(&e) =>
                    {
                        let backoff = backoff_of(policy, &e, attempt);
                        warn!(
                            story_id,
                            index,
                            attempt,
                            %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "glyph fetch failed, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(RetrieveError::Reassembly(ReassemblyError::Integrity(_))) => {
                        // Divergent digest even after refetching: surfaced,
                        // never rendered as valid content.
                        return Err(RetrieveError::Integrity { index, attempts: attempt });
                    }
                    Err(e) => return Err(e),
                }
            }

            let loaded = self
                .state
                .lock()
                .unwrap()
                .as_ref()
                .map(|s| s.loaded())
                .unwrap_or(0);
            self.progress.update(RetrieveStage::FetchingContent, loaded, total);
        }

        Ok(())
    }

    async fn fetch_one_glyph(
        &self,
        story_id: &str,
        index: u32,
        tx: &TransactionRef,
    ) -> Result<(), RetrieveError> {
        let bytes = self.ledger.read(tx).await?;
        let envelope = Envelope::decode_expecting(&bytes, EnvelopeKind::Content)?;
        if envelope.story_id != story_id || envelope.index != index {
            return Err(RetrieveError::Manifest(ManifestError::Invalid(format!(
                "content ref {} resolved to story {} glyph {}",
                index, envelope.story_id, envelope.index
            ))));
        }

        let mut state = self.state.lock().unwrap();
        state
            .as_mut()
            .expect("reassembly state initialized")
            .accept(index, envelope.payload, self.hasher.as_ref())?;
        Ok(())
    }

    async fn read_with_retry(&self, tx: &TransactionRef) -> Result<Vec<u8>, LedgerError> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match self.ledger.read(tx).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(&e, attempt);
                    warn!(%tx, %e, attempt, backoff_ms = backoff.as_millis() as u64, "read failed, backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), RetrieveError> {
        if self.cancel.is_cancelled() {
            Err(RetrieveError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn is_retryable(error: &RetrieveError) -> bool {
    match error {
        RetrieveError::Ledger(e) => e.is_retryable(),
        RetrieveError::Reassembly(ReassemblyError::Integrity(
            HashListError::IntegrityFailure { .. },
        )) => true,
        _ => false,
    }
}

fn backoff_of(
    policy: &crate::config::RetryPolicy,
    error: &RetrieveError,
    attempt: u32,
) -> std::time::Duration {
    match error {
        RetrieveError::Ledger(e) => policy.backoff_for(e, attempt),
        _ => policy.backoff_for(&LedgerError::Network(String::new()), attempt),
    }
}
