//! A scanning session: every text goes through the verifier and then into
//! the session's ledger.

use time::OffsetDateTime;
use tracing::info;

use crate::ledger::{LedgerStats, RegisteredScan, SharedLedger};
use crate::policy::Policy;
use crate::verifier::Verifier;

#[derive(Debug, Clone)]
pub struct ScanSession {
    verifier: Verifier,
    ledger: SharedLedger,
}

impl ScanSession {
    pub fn new(verifier: Verifier) -> Self {
        Self::with_ledger(verifier, SharedLedger::new())
    }

    /// Share an existing ledger, e.g. between several scanner stations.
    pub fn with_ledger(verifier: Verifier, ledger: SharedLedger) -> Self {
        Self { verifier, ledger }
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Verify `text` now and record the result.
    pub fn scan(&self, text: &str, policy: &Policy) -> RegisteredScan {
        self.scan_at(text, policy, OffsetDateTime::now_utc())
    }

    /// Verify `text` as of `at` and record it with that capture time.
    pub fn scan_at(&self, text: &str, policy: &Policy, at: OffsetDateTime) -> RegisteredScan {
        let outcome = self.verifier.verify_at(text, policy, at.unix_timestamp());
        let registered = self.ledger.lock().register_scan_at(text, outcome, at);
        if let Some(original) = &registered.original {
            info!(
                record = %registered.record.id,
                original = %original.id,
                "repeat presentation"
            );
        }
        registered
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }
}
