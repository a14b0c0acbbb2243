//! Three-phase publication driver
//!
//! Drives a fully assembled [`PublicationPackage`] onto the ledger:
//! hash-list chunks first (content verification depends on a complete
//! hash list), then content glyphs in index order, then the manifest root
//! last, because the root embeds the confirmed references of everything
//! before it. The root's own transaction reference is the story's address.
//!
//! Transient failures are retried with backoff up to a bounded attempt
//! count; exhausting retries degrades to a `Partial` result instead of
//! discarding confirmed work. Confirmed references are recorded in the
//! package as they land, so re-invoking `publish` resumes from the first
//! unconfirmed chunk without duplicating transactions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::envelope::{Envelope, EnvelopeError, EnvelopeKind};
use crate::ledger::{Ledger, LedgerError, Signer, TransactionRef};
use crate::manifest::{ManifestError, PublicationPackage};
use crate::progress::{CancelFlag, ProgressTracker};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("a publish is already in flight for story {0}")]
    AlreadyInFlight(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Publication state machine stages, reported through the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
    Preparing,
    Processing,
    PublishingHashlist,
    PublishingContent,
    CreatingRoot,
    Completed,
    Failed,
}

/// Outcome of one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// Everything confirmed; the root reference addresses the story.
    Completed { root_ref: TransactionRef },
    /// Retries exhausted partway; confirmed chunks are kept in the
    /// package and a re-publish resumes from the first unconfirmed index.
    Partial {
        successful_glyphs: u32,
        total_glyphs: u32,
    },
    /// Terminal failure (rejection or cancellation) for this attempt.
    Failed { reason: String },
}

/// Drives packages onto the ledger, one in-flight publish per story.
pub struct Publisher {
    ledger: Arc<dyn Ledger>,
    config: ProtocolConfig,
    in_flight: Mutex<HashSet<String>>,
}

/// Removes the story id from the in-flight set when the publish returns,
/// on every path.
struct FlightGuard<'a> {
    publisher: &'a Publisher,
    story_id: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.publisher
            .in_flight
            .lock()
            .unwrap()
            .remove(&self.story_id);
    }
}

impl Publisher {
    pub fn new(ledger: Arc<dyn Ledger>, config: ProtocolConfig) -> Self {
        Self {
            ledger,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Publish (or resume publishing) a package.
    ///
    /// Chunk indices and the root commitment assume one linear submission
    /// order, so a second publish for the same story while one is running
    /// is refused rather than interleaved.
    pub async fn publish(
        &self,
        package: &mut PublicationPackage,
        signer: &Signer,
        progress: &ProgressTracker<PublishStage>,
        cancel: &CancelFlag,
    ) -> Result<PublishResult, PublishError> {
        let story_id = package.manifest.story_id.clone();

        // Already fully confirmed: re-running must not duplicate the root.
        if let Some(root_ref) = &package.root_ref {
            return Ok(PublishResult::Completed {
                root_ref: root_ref.clone(),
            });
        }

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(story_id.clone()) {
                return Err(PublishError::AlreadyInFlight(story_id));
            }
        }
        let _guard = FlightGuard {
            publisher: self,
            story_id: story_id.clone(),
        };

        let total_glyphs = package.glyphs.len() as u32;
        progress.update(PublishStage::Preparing, 0, total_glyphs);
        progress.set_stage(PublishStage::Processing);

        // Phase 1: hash-list chunks. Every one must confirm before any
        // content goes out, since readers verify content against the hash list.
        progress.update(
            PublishStage::PublishingHashlist,
            package.confirmed_hash_list_chunks(),
            package.manifest.total_hash_list_chunks,
        );

        for i in 0..package.hash_list_chunks.len() {
            if package.hash_list_refs[i].is_some() {
                continue; // confirmed by a previous attempt
            }
            if cancel.is_cancelled() {
                return self.bail_cancelled(&story_id, progress);
            }

            let chunk = &package.hash_list_chunks[i];
            let payload =
                Envelope::new(&story_id, EnvelopeKind::HashList, chunk.index, chunk.to_bytes())
                    .encode()?;

            match self.submit_with_retry(&payload, signer).await {
                Ok(tx) => {
                    debug!(%story_id, index = chunk.index, %tx, "hash-list chunk confirmed");
                    package.hash_list_refs[i] = Some(tx);
                    progress.update(
                        PublishStage::PublishingHashlist,
                        package.confirmed_hash_list_chunks(),
                        package.manifest.total_hash_list_chunks,
                    );
                }
                Err(e) => return Ok(self.degrade(&story_id, package, e, progress)),
            }
        }

        // Phase 2: content glyphs, strictly in index order.
        progress.update(
            PublishStage::PublishingContent,
            package.confirmed_glyphs(),
            total_glyphs,
        );

        for i in 0..package.glyphs.len() {
            if package.glyph_refs[i].is_some() {
                continue;
            }
            if cancel.is_cancelled() {
                return self.bail_cancelled(&story_id, progress);
            }

            let glyph = &package.glyphs[i];
            let payload = Envelope::new(
                &story_id,
                EnvelopeKind::Content,
                glyph.index,
                glyph.payload.clone(),
            )
            .encode()?;

            match self.submit_with_retry(&payload, signer).await {
                Ok(tx) => {
                    debug!(%story_id, index = glyph.index, %tx, "glyph confirmed");
                    package.glyph_refs[i] = Some(tx);
                    progress.update(
                        PublishStage::PublishingContent,
                        package.confirmed_glyphs(),
                        total_glyphs,
                    );
                }
                Err(e) => return Ok(self.degrade(&story_id, package, e, progress)),
            }
        }

        // Phase 3: the root, last, embedding every confirmed reference.
        if cancel.is_cancelled() {
            return self.bail_cancelled(&story_id, progress);
        }
        progress.update(PublishStage::CreatingRoot, total_glyphs, total_glyphs);

        package.manifest.chunks = package
            .glyph_refs
            .iter()
            .map(|r| r.clone().expect("all glyphs confirmed"))
            .collect();
        package.manifest.hash_list_chunks = package
            .hash_list_refs
            .iter()
            .map(|r| r.clone().expect("all hash-list chunks confirmed"))
            .collect();

        let root_payload = package.manifest.to_json()?;
        match self.submit_with_retry(&root_payload, signer).await {
            Ok(root_ref) => {
                package.root_ref = Some(root_ref.clone());
                progress.update(PublishStage::Completed, total_glyphs, total_glyphs);
                info!(%story_id, %root_ref, glyphs = total_glyphs, "publication completed");
                Ok(PublishResult::Completed { root_ref })
            }
            Err(e) => Ok(self.degrade(&story_id, package, e, progress)),
        }
    }

    /// Submit one payload, retrying transient failures with backoff.
    async fn submit_with_retry(
        &self,
        payload: &[u8],
        signer: &Signer,
    ) -> Result<TransactionRef, LedgerError> {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            match self.ledger.submit(payload, signer).await {
                Ok(tx) => return Ok(tx),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let backoff = policy.backoff_for(&e, attempt);
                    warn!(%e, attempt, backoff_ms = backoff.as_millis() as u64, "submission failed, backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Turn a submission failure into a result that keeps confirmed work.
    fn degrade(
        &self,
        story_id: &str,
        package: &PublicationPackage,
        error: LedgerError,
        progress: &ProgressTracker<PublishStage>,
    ) -> PublishResult {
        progress.set_stage(PublishStage::Failed);
        let successful_glyphs = package.confirmed_glyphs();
        let total_glyphs = package.glyphs.len() as u32;

        if error.is_retryable() {
            warn!(
                story_id,
                %error,
                successful_glyphs,
                total_glyphs,
                "publish degraded to partial; confirmed chunks kept for resume"
            );
            PublishResult::Partial {
                successful_glyphs,
                total_glyphs,
            }
        } else {
            warn!(story_id, %error, "publish failed");
            PublishResult::Failed {
                reason: error.to_string(),
            }
        }
    }

    fn bail_cancelled(
        &self,
        story_id: &str,
        progress: &ProgressTracker<PublishStage>,
    ) -> Result<PublishResult, PublishError> {
        info!(story_id, "publish cancelled by caller");
        progress.set_stage(PublishStage::Failed);
        Ok(PublishResult::Failed {
            reason: "cancelled by caller".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::hasher::Sha256Hasher;
    use crate::manifest::{PackageBuilder, StoryMeta};
    use crate::memory_ledger::MemoryLedger;

    fn fast_config() -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config.retry = RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 1,
            rate_limit_backoff_ms: 1,
        };
        config
    }

    /// Low-compressibility text, so packages span several glyphs.
    fn noisy(len: usize) -> String {
        use rand::distributions::Alphanumeric;
        use rand::Rng;
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn build_package(config: &ProtocolConfig, text: &str) -> PublicationPackage {
        let meta = StoryMeta {
            story_id: Some("scroll-pub-test".to_string()),
            title: "Publishing".to_string(),
            author: "A. Writer".to_string(),
            author_public_key: "writer-pk".to_string(),
        };
        PackageBuilder::new(config.clone())
            .unwrap()
            .build(&meta, text, &Sha256Hasher)
            .unwrap()
    }

    fn tracker() -> ProgressTracker<PublishStage> {
        ProgressTracker::new(PublishStage::Preparing)
    }

    #[tokio::test]
    async fn test_publish_completes() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, &"a story to publish. ".repeat(200));
        let progress = tracker();

        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &CancelFlag::new())
            .await
            .unwrap();

        let root_ref = match result {
            PublishResult::Completed { root_ref } => root_ref,
            other => panic!("expected Completed, got {:?}", other),
        };

        // hash-list chunks + glyphs + root, each exactly once
        let expected = package.hash_list_chunks.len() + package.glyphs.len() + 1;
        assert_eq!(ledger.confirmed_submissions(), expected as u64);
        assert_eq!(progress.latest().stage, PublishStage::Completed);
        assert!(package.is_fully_submitted());

        // The stored root parses and references every chunk.
        let root_bytes = ledger.payload_of(&root_ref).unwrap();
        let manifest = crate::manifest::ManifestRoot::from_json(&root_bytes).unwrap();
        assert_eq!(manifest.chunks.len(), package.glyphs.len());
    }

    #[tokio::test]
    async fn test_transient_submit_failure_is_retried() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail_next_submits(vec![LedgerError::Network("blip".into())]);

        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, "short story");
        let progress = tracker();

        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &CancelFlag::new())
            .await
            .unwrap();
        assert!(matches!(result, PublishResult::Completed { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_retries_degrade_to_partial_and_resume() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, &noisy(8_000));
        let total = package.glyphs.len() as u32;
        assert!(total >= 3, "fixture needs several glyphs");

        // Submission order is deterministic: hash-list chunks, then glyphs
        // in index order. Fail all three attempts on the third glyph.
        let third_glyph_call = package.hash_list_chunks.len() as u64 + 2;
        for attempt in 0..3 {
            ledger.fail_submit_at(
                third_glyph_call + attempt,
                LedgerError::Network("link down".into()),
            );
        }

        let progress = tracker();
        let cancel = CancelFlag::new();
        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &cancel)
            .await
            .unwrap();

        match result {
            PublishResult::Partial {
                successful_glyphs,
                total_glyphs,
            } => {
                assert_eq!(successful_glyphs, 2);
                assert_eq!(total_glyphs, total);
            }
            other => panic!("expected Partial, got {:?}", other),
        }
        assert_eq!(progress.latest().stage, PublishStage::Failed);
        assert!(package.root_ref.is_none());

        let confirmed_before_resume = ledger.confirmed_submissions();

        // Resume: only the unconfirmed suffix (and the root) is submitted;
        // nothing already confirmed goes out twice.
        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &cancel)
            .await
            .unwrap();
        assert!(matches!(result, PublishResult::Completed { .. }));

        let expected_new = (total - 2) as u64 + 1; // remaining glyphs + root
        assert_eq!(
            ledger.confirmed_submissions(),
            confirmed_before_resume + expected_new
        );
    }

    #[tokio::test]
    async fn test_rejection_fails_terminally() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.fail_next_submits(vec![LedgerError::Rejected("bad signer".into())]);

        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, "doomed story");
        let progress = tracker();

        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &CancelFlag::new())
            .await
            .unwrap();
        assert!(matches!(result, PublishResult::Failed { .. }));
        assert_eq!(progress.latest().stage, PublishStage::Failed);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_submission() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, "cancel me");
        let progress = tracker();

        let cancel = CancelFlag::new();
        cancel.cancel();

        let result = publisher
            .publish(&mut package, &Signer::new("pk"), &progress, &cancel)
            .await
            .unwrap();
        assert!(matches!(result, PublishResult::Failed { .. }));
        assert_eq!(ledger.confirmed_submissions(), 0);
    }

    #[tokio::test]
    async fn test_single_flight_per_story() {
        // One publisher, same story, overlapping calls.
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = Arc::new(Publisher::new(ledger.clone(), config.clone()));
        let package = build_package(&config, &"single flight ".repeat(300));

        let mut first = package.clone();
        let mut second = package.clone();

        let p1 = publisher.clone();
        let signer = Signer::new("pk");
        let progress_a = tracker();
        let cancel = CancelFlag::new();

        // Hold the first publish open by making every submit slow to
        // confirm: script enough retryable faults that it spends time in
        // backoff while the second call arrives.
        ledger.fail_next_submits(vec![LedgerError::Network("slow".into())]);

        let signer2 = signer.clone();
        let first_task = tokio::spawn({
            let cancel = cancel.clone();
            async move { p1.publish(&mut first, &signer2, &progress_a, &cancel).await }
        });

        // Give the first publish a moment to claim the story id.
        tokio::task::yield_now().await;

        let progress_b = tracker();
        let second_result = publisher
            .publish(&mut second, &signer, &progress_b, &cancel)
            .await;

        match second_result {
            Err(PublishError::AlreadyInFlight(id)) => assert_eq!(id, "scroll-pub-test"),
            other => panic!("expected AlreadyInFlight, got {:?}", other),
        }

        let first_result = first_task.await.unwrap().unwrap();
        assert!(matches!(first_result, PublishResult::Completed { .. }));

        // Once the first publish finished, the story id is free again.
        let mut third = package.clone();
        let result = publisher
            .publish(&mut third, &signer, &tracker(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(matches!(result, PublishResult::Completed { .. }));
    }

    #[tokio::test]
    async fn test_republishing_completed_package_is_idempotent() {
        let config = fast_config();
        let ledger = Arc::new(MemoryLedger::new());
        let publisher = Publisher::new(ledger.clone(), config.clone());
        let mut package = build_package(&config, "publish once");
        let signer = Signer::new("pk");

        let first = publisher
            .publish(&mut package, &signer, &tracker(), &CancelFlag::new())
            .await
            .unwrap();
        let submissions = ledger.confirmed_submissions();

        let second = publisher
            .publish(&mut package, &signer, &tracker(), &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.confirmed_submissions(), submissions);
    }
}
