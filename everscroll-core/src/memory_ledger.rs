//! In-memory ledger implementation
//!
//! Backs the protocol with a `Mutex<HashMap>` instead of a chain: useful
//! for tests and for exercising publish/retrieve flows without external
//! infrastructure. Faults can be scripted per operation to simulate flaky
//! networks, rate limiting, and tampered payloads.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DEFAULT_MAX_TX_PAYLOAD;
use crate::ledger::{Ledger, LedgerError, Signer, TransactionRef};

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Vec<u8>>,
    next_seq: u64,
    submit_calls: u64,
    submit_count: u64,
    submit_faults: VecDeque<LedgerError>,
    submit_faults_at: HashMap<u64, LedgerError>,
    read_faults: HashMap<String, VecDeque<LedgerError>>,
}

/// In-memory [`Ledger`] with scripted fault injection.
pub struct MemoryLedger {
    max_payload: usize,
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_TX_PAYLOAD)
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        assert!(max_payload > 0, "max_payload must be greater than 0");
        Self {
            max_payload,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Script errors to be returned by upcoming `submit` calls, in order,
    /// before submissions succeed again.
    pub fn fail_next_submits(&self, errors: Vec<LedgerError>) {
        self.inner.lock().unwrap().submit_faults.extend(errors);
    }

    /// Script an error for the Nth `submit` call overall (0-based),
    /// counting every call including faulted ones. Submission order is
    /// deterministic, so this pins failures to specific chunks.
    pub fn fail_submit_at(&self, call: u64, error: LedgerError) {
        self.inner
            .lock()
            .unwrap()
            .submit_faults_at
            .insert(call, error);
    }

    /// Script errors for upcoming reads of one transaction, in order.
    pub fn fail_next_reads(&self, tx: &TransactionRef, errors: Vec<LedgerError>) {
        self.inner
            .lock()
            .unwrap()
            .read_faults
            .entry(tx.0.clone())
            .or_default()
            .extend(errors);
    }

    /// Overwrite a stored payload in place, for integrity-failure tests.
    pub fn tamper(&self, tx: &TransactionRef, mutate: impl FnOnce(&mut Vec<u8>)) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(payload) = inner.transactions.get_mut(&tx.0) {
            mutate(payload);
        }
    }

    /// Total `submit` calls that reached storage (faulted calls excluded).
    pub fn confirmed_submissions(&self) -> u64 {
        self.inner.lock().unwrap().submit_count
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.lock().unwrap().transactions.len()
    }

    pub fn payload_of(&self, tx: &TransactionRef) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().transactions.get(&tx.0).cloned()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn submit(&self, payload: &[u8], signer: &Signer) -> Result<TransactionRef, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        let call = inner.submit_calls;
        inner.submit_calls += 1;

        if let Some(fault) = inner.submit_faults_at.remove(&call) {
            debug!(call, %fault, "memory ledger: scripted submit fault");
            return Err(fault);
        }
        if let Some(fault) = inner.submit_faults.pop_front() {
            debug!(%fault, "memory ledger: scripted submit fault");
            return Err(fault);
        }

        if payload.len() > self.max_payload {
            return Err(LedgerError::Rejected(format!(
                "payload of {} bytes exceeds max of {}",
                payload.len(),
                self.max_payload
            )));
        }

        inner.next_seq += 1;
        inner.submit_count += 1;
        let tx = TransactionRef(format!("tx-{:08x}", inner.next_seq));
        inner.transactions.insert(tx.0.clone(), payload.to_vec());
        debug!(%tx, size = payload.len(), signer = %signer.public_key, "memory ledger: stored transaction");
        Ok(tx)
    }

    async fn read(&self, tx: &TransactionRef) -> Result<Vec<u8>, LedgerError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(queue) = inner.read_faults.get_mut(&tx.0) {
            if let Some(fault) = queue.pop_front() {
                debug!(%tx, %fault, "memory ledger: scripted read fault");
                return Err(fault);
            }
        }

        inner
            .transactions
            .get(&tx.0)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(tx.0.clone()))
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new("test-author-key")
    }

    #[tokio::test]
    async fn test_submit_read_roundtrip() {
        let ledger = MemoryLedger::new();
        let tx = ledger.submit(b"hello ledger", &signer()).await.unwrap();
        let payload = ledger.read(&tx).await.unwrap();
        assert_eq!(payload, b"hello ledger");
        assert_eq!(ledger.confirmed_submissions(), 1);
    }

    #[tokio::test]
    async fn test_read_unknown_ref() {
        let ledger = MemoryLedger::new();
        let result = ledger.read(&TransactionRef("tx-missing".into())).await;
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let ledger = MemoryLedger::with_max_payload(16);
        let result = ledger.submit(&[0u8; 17], &signer()).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(ledger.confirmed_submissions(), 0);
    }

    #[tokio::test]
    async fn test_scripted_submit_faults_drain_in_order() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_submits(vec![
            LedgerError::Network("connection reset".into()),
            LedgerError::RateLimit("slow down".into()),
        ]);

        assert!(matches!(
            ledger.submit(b"a", &signer()).await,
            Err(LedgerError::Network(_))
        ));
        assert!(matches!(
            ledger.submit(b"a", &signer()).await,
            Err(LedgerError::RateLimit(_))
        ));
        // Faults exhausted, submission goes through.
        assert!(ledger.submit(b"a", &signer()).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_read_faults_are_per_ref() {
        let ledger = MemoryLedger::new();
        let tx_a = ledger.submit(b"aaa", &signer()).await.unwrap();
        let tx_b = ledger.submit(b"bbb", &signer()).await.unwrap();

        ledger.fail_next_reads(&tx_a, vec![LedgerError::Network("flaky".into())]);

        assert!(ledger.read(&tx_a).await.is_err());
        assert_eq!(ledger.read(&tx_b).await.unwrap(), b"bbb");
        assert_eq!(ledger.read(&tx_a).await.unwrap(), b"aaa");
    }

    #[tokio::test]
    async fn test_positional_submit_fault() {
        let ledger = MemoryLedger::new();
        ledger.fail_submit_at(1, LedgerError::Network("second call".into()));

        assert!(ledger.submit(b"a", &signer()).await.is_ok());
        assert!(matches!(
            ledger.submit(b"b", &signer()).await,
            Err(LedgerError::Network(_))
        ));
        assert!(ledger.submit(b"b", &signer()).await.is_ok());
    }

    #[tokio::test]
    async fn test_tamper() {
        let ledger = MemoryLedger::new();
        let tx = ledger.submit(b"pristine", &signer()).await.unwrap();
        ledger.tamper(&tx, |payload| payload[0] ^= 0xff);
        assert_ne!(ledger.read(&tx).await.unwrap(), b"pristine");
    }
}
