//! Polling-friendly progress reporting
//!
//! Publication and retrieval both report `{stage, current, total}`
//! snapshots through a `tokio::sync::watch` channel: consumers poll or
//! await changes without the protocol being coupled to any callback or
//! event-loop mechanism. How a UI renders the numbers (discrete grid,
//! percentage bar, anything else) is its own business; the contract here
//! is threshold-agnostic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// One observation of an operation's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot<S> {
    pub stage: S,
    pub current: u32,
    pub total: u32,
}

impl<S> ProgressSnapshot<S> {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 * 100.0 / self.total as f64
        }
    }
}

/// Producer half of a progress channel.
///
/// Cheap to clone; every clone feeds the same subscribers.
#[derive(Debug, Clone)]
pub struct ProgressTracker<S> {
    tx: watch::Sender<ProgressSnapshot<S>>,
}

impl<S: Clone> ProgressTracker<S> {
    pub fn new(initial_stage: S) -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot {
            stage: initial_stage,
            current: 0,
            total: 0,
        });
        Self { tx }
    }

    /// Subscribe to snapshot updates. Receivers see the latest value
    /// immediately and every change thereafter.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot<S>> {
        self.tx.subscribe()
    }

    /// Publish a full snapshot.
    pub fn update(&self, stage: S, current: u32, total: u32) {
        self.tx.send_replace(ProgressSnapshot {
            stage,
            current,
            total,
        });
    }

    /// Advance the stage, keeping current/total counters.
    pub fn set_stage(&self, stage: S) {
        self.tx.send_modify(|snapshot| snapshot.stage = stage);
    }

    /// Latest published snapshot.
    pub fn latest(&self) -> ProgressSnapshot<S> {
        self.tx.borrow().clone()
    }
}

/// Cooperative cancellation signal.
///
/// Checked between ledger operations: flipping it stops new requests from
/// being issued while in-flight ones drain. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    enum Stage {
        Idle,
        Working,
        Done,
    }

    #[test]
    fn test_percent() {
        let snapshot = ProgressSnapshot {
            stage: Stage::Working,
            current: 5,
            total: 20,
        };
        assert!((snapshot.percent() - 25.0).abs() < f64::EPSILON);

        let empty = ProgressSnapshot {
            stage: Stage::Idle,
            current: 0,
            total: 0,
        };
        assert_eq!(empty.percent(), 0.0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let tracker = ProgressTracker::new(Stage::Idle);
        let mut rx = tracker.subscribe();

        assert_eq!(rx.borrow().stage, Stage::Idle);

        tracker.update(Stage::Working, 3, 10);
        rx.changed().await.unwrap();
        let snapshot = *rx.borrow();
        assert_eq!(snapshot.stage, Stage::Working);
        assert_eq!(snapshot.current, 3);
        assert_eq!(snapshot.total, 10);
    }

    #[test]
    fn test_set_stage_keeps_counters() {
        let tracker = ProgressTracker::new(Stage::Idle);
        tracker.update(Stage::Working, 7, 9);
        tracker.set_stage(Stage::Done);

        let latest = tracker.latest();
        assert_eq!(latest.stage, Stage::Done);
        assert_eq!(latest.current, 7);
        assert_eq!(latest.total, 9);
    }

    #[test]
    fn test_update_without_subscribers_does_not_fail() {
        let tracker = ProgressTracker::new(Stage::Idle);
        tracker.update(Stage::Working, 1, 2);
        assert_eq!(tracker.latest().current, 1);
    }

    #[test]
    fn test_cancel_flag_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());

        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
