//! In-memory scan ledger with duplicate detection.
//!
//! Every verification the operator performs is registered here as a
//! [`ScanRecord`].  Successful scans are keyed by credential subject; the
//! earliest successful record for a subject (by capture time, then by
//! registration order) is the *original* and every other successful record
//! for that subject is a *repeat* of it.  Failed scans are never keyed and so
//! never count as repeats.
//!
//! The ledger lives for one scanning session.  Nothing is persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::verifier::VerificationOutcome;

/// Stored in place of the scanned text once a credential has verified.
pub const REDACTED_PLACEHOLDER: &str = "[QR data truncated for security]";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: Uuid,
    /// Trimmed scanned text for failures, [`REDACTED_PLACEHOLDER`] for successes.
    pub captured_text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub outcome: VerificationOutcome,
    pub is_repeat: bool,
}

impl ScanRecord {
    fn subject(&self) -> Option<&str> {
        self.outcome.verified_subject()
    }
}

/// What [`ScanLedger::register_scan`] hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredScan {
    pub record: ScanRecord,
    pub is_repeat: bool,
    /// The original this scan repeats, when it is a repeat.
    pub original: Option<ScanRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub repeat_count: usize,
    pub unique_count: usize,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct Entry {
    /// Registration order; breaks timestamp ties.
    seq: u64,
    record: ScanRecord,
}

impl Entry {
    fn order_key(&self) -> (OffsetDateTime, u64) {
        (self.record.timestamp, self.seq)
    }
}

#[derive(Default)]
pub struct ScanLedger {
    /// Keyed by record id, in registration order (oldest first).
    entries: IndexMap<Uuid, Entry>,
    next_seq: u64,
    /// subject → id of the current original.
    originals: HashMap<String, Uuid>,
}

impl std::fmt::Debug for ScanLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanLedger")
            .field("records", &self.entries.len())
            .field("subjects", &self.originals.len())
            .finish()
    }
}

impl ScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scan captured now.
    pub fn register_scan(&mut self, raw_text: &str, outcome: VerificationOutcome) -> RegisteredScan {
        self.register_scan_at(raw_text, outcome, OffsetDateTime::now_utc())
    }

    /// Register a scan captured at `timestamp`.
    ///
    /// The timestamp may be older than records already present; the
    /// original for the subject is then reassigned to this record.
    pub fn register_scan_at(
        &mut self,
        raw_text: &str,
        outcome: VerificationOutcome,
        timestamp: OffsetDateTime,
    ) -> RegisteredScan {
        let captured_text = if outcome.success {
            REDACTED_PLACEHOLDER.to_string()
        } else {
            raw_text.trim().to_string()
        };
        let mut entry = Entry {
            seq: self.next_seq,
            record: ScanRecord {
                id: Uuid::new_v4(),
                captured_text,
                timestamp,
                outcome,
                is_repeat: false,
            },
        };
        self.next_seq += 1;

        let mut original = None;
        if let Some(subject) = entry.record.subject().map(str::to_owned) {
            match self.originals.get(&subject).copied() {
                Some(current_id) => {
                    match self.entries.get_mut(&current_id) {
                        Some(current) if current.order_key() <= entry.order_key() => {
                            original = Some(current.record.clone());
                        }
                        Some(current) => {
                            debug!(%subject, "earlier capture replaces original");
                            current.record.is_repeat = true;
                            self.originals.insert(subject, entry.record.id);
                        }
                        None => {
                            self.originals.insert(subject, entry.record.id);
                        }
                    }
                }
                None => {
                    self.originals.insert(subject, entry.record.id);
                }
            }
        }

        entry.record.is_repeat = original.is_some();
        let record = entry.record.clone();
        self.entries.insert(record.id, entry);

        RegisteredScan {
            is_repeat: record.is_repeat,
            record,
            original,
        }
    }

    /// Remove one record.  Returns whether anything was removed.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(removed) = self.entries.shift_remove(&id) else {
            return false;
        };

        if let Some(subject) = removed.record.subject() {
            if self.originals.get(subject) == Some(&id) {
                self.originals.remove(subject);
                let subject = subject.to_owned();
                self.promote_earliest(&subject);
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.originals.clear();
    }

    /// Aggregate counts over the live records.
    pub fn stats(&self) -> LedgerStats {
        let total = self.entries.len();
        let valid_count = self
            .entries
            .values()
            .filter(|e| e.record.outcome.success)
            .count();
        let repeat_count = self.entries.values().filter(|e| e.record.is_repeat).count();
        LedgerStats {
            total,
            valid_count,
            invalid_count: total - valid_count,
            repeat_count,
            unique_count: total - repeat_count,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records, most recently registered first.
    pub fn records(&self) -> impl Iterator<Item = &ScanRecord> + '_ {
        self.entries.values().rev().map(|e| &e.record)
    }

    pub fn get(&self, id: Uuid) -> Option<&ScanRecord> {
        self.entries.get(&id).map(|e| &e.record)
    }

    /// The original successful record for `subject`.
    pub fn find_by_subject(&self, subject: &str) -> Option<&ScanRecord> {
        self.originals.get(subject).and_then(|id| self.get(*id))
    }

    /// Most recent record whose stored text equals `text` (trimmed).
    pub fn find_by_captured_text(&self, text: &str) -> Option<&ScanRecord> {
        let text = text.trim();
        self.records().find(|r| r.captured_text == text)
    }

    /// The original that record `id` repeats, if it is a repeat.
    pub fn original_of(&self, id: Uuid) -> Option<&ScanRecord> {
        let record = self.get(id)?;
        if !record.is_repeat {
            return None;
        }
        record.subject().and_then(|s| self.find_by_subject(s))
    }

    fn promote_earliest(&mut self, subject: &str) {
        let earliest = self
            .entries
            .values_mut()
            .filter(|e| e.record.subject() == Some(subject))
            .min_by_key(|e| e.order_key());
        if let Some(entry) = earliest {
            entry.record.is_repeat = false;
            self.originals.insert(subject.to_owned(), entry.record.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Cloneable handle that serialises all access to one [`ScanLedger`].
///
/// Two concurrent first sightings of a subject are registered one after the
/// other, so only one of them can become the original.
#[derive(Debug, Clone, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<ScanLedger>>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the ledger.  A poisoned lock is recovered; the ledger holds no
    /// invariant that a panicking reader could have broken half-way.
    pub fn lock(&self) -> MutexGuard<'_, ScanLedger> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_scan(&self, raw_text: &str, outcome: VerificationOutcome) -> RegisteredScan {
        self.lock().register_scan(raw_text, outcome)
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.lock().remove(id)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> LedgerStats {
        self.lock().stats()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::payload::{CredentialClass, CredentialPayload};

    fn ok(subject: &str) -> VerificationOutcome {
        VerificationOutcome {
            success: true,
            payload: Some(CredentialPayload {
                subject: subject.into(),
                display_name: "Ada".into(),
                issued_at: 0,
                expires_at: i64::MAX,
                class: CredentialClass::AppIssued,
            }),
            error: None,
            diagnostics: None,
        }
    }

    fn failed(subject: Option<&str>) -> VerificationOutcome {
        VerificationOutcome {
            success: false,
            payload: subject.map(|s| ok(s).payload.unwrap()),
            error: Some("Invalid signature".into()),
            diagnostics: None,
        }
    }

    fn t(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000 + secs)
    }

    #[test]
    fn first_sighting_is_original_then_repeats() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("qr-1", ok("alice"), t(1));
        assert!(!a.is_repeat);
        assert!(a.original.is_none());
        assert_eq!(a.record.captured_text, REDACTED_PLACEHOLDER);

        let b = l.register_scan_at("qr-2", ok("alice"), t(2));
        assert!(b.is_repeat);
        assert_eq!(b.original.as_ref().map(|r| r.id), Some(a.record.id));
        assert_eq!(l.original_of(b.record.id).map(|r| r.id), Some(a.record.id));
        assert_eq!(l.original_of(a.record.id), None);
    }

    #[test]
    fn earliest_timestamp_wins_over_registration_order() {
        let mut l = ScanLedger::new();
        let s2 = l.register_scan_at("x", ok("bob"), t(20));
        let s3 = l.register_scan_at("x", ok("bob"), t(30));
        let s1 = l.register_scan_at("x", ok("bob"), t(10));

        assert!(!s1.is_repeat);
        assert!(s1.original.is_none());
        assert!(l.get(s2.record.id).unwrap().is_repeat);
        assert!(l.get(s3.record.id).unwrap().is_repeat);
        assert_eq!(l.find_by_subject("bob").unwrap().id, s1.record.id);
        assert_eq!(l.original_of(s2.record.id).unwrap().id, s1.record.id);
        assert_eq!(l.stats().repeat_count, 2);
    }

    #[test]
    fn equal_timestamps_break_by_registration() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("x", ok("c"), t(5));
        let b = l.register_scan_at("x", ok("c"), t(5));
        assert!(!l.get(a.record.id).unwrap().is_repeat);
        assert!(b.is_repeat);
    }

    #[test]
    fn failures_are_never_repeats() {
        let mut l = ScanLedger::new();
        l.register_scan_at("x", ok("dora"), t(1));
        let f = l.register_scan_at("  raw text  ", failed(Some("dora")), t(2));
        assert!(!f.is_repeat);
        assert!(f.original.is_none());
        assert_eq!(f.record.captured_text, "raw text");

        let g = l.register_scan_at("raw text", failed(None), t(3));
        assert!(!g.is_repeat);
        assert_eq!(
            l.find_by_captured_text(" raw text").map(|r| r.id),
            Some(g.record.id)
        );
    }

    #[test]
    fn removing_original_promotes_next_earliest() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("x", ok("eve"), t(1));
        let b = l.register_scan_at("x", ok("eve"), t(2));
        let c = l.register_scan_at("x", ok("eve"), t(3));

        assert!(l.remove(a.record.id));
        assert!(!l.remove(a.record.id));
        assert!(!l.get(b.record.id).unwrap().is_repeat);
        assert!(l.get(c.record.id).unwrap().is_repeat);
        assert_eq!(l.find_by_subject("eve").unwrap().id, b.record.id);

        let d = l.register_scan_at("x", ok("eve"), t(4));
        assert_eq!(d.original.unwrap().id, b.record.id);
    }

    #[test]
    fn removing_last_record_frees_subject() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("x", ok("fay"), t(1));
        l.remove(a.record.id);
        assert!(l.find_by_subject("fay").is_none());
        assert!(!l.register_scan_at("x", ok("fay"), t(2)).is_repeat);
    }

    #[test]
    fn stats_follow_live_records() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("x", ok("g"), t(1));
        l.register_scan_at("x", ok("g"), t(2));
        l.register_scan_at("bad input", failed(None), t(3));
        assert_eq!(
            l.stats(),
            LedgerStats {
                total: 3,
                valid_count: 2,
                invalid_count: 1,
                repeat_count: 1,
                unique_count: 2,
            }
        );

        l.remove(a.record.id);
        assert_eq!(l.stats().repeat_count, 0);
        assert_eq!(l.stats().unique_count, 2);

        l.clear();
        assert_eq!(l.stats(), LedgerStats::default());
        assert!(l.is_empty());
    }

    #[test]
    fn records_are_newest_first() {
        let mut l = ScanLedger::new();
        let a = l.register_scan_at("aaaaaaaaaaaa", failed(None), t(1));
        let b = l.register_scan_at("bbbbbbbbbbbb", failed(None), t(2));
        let ids: Vec<_> = l.records().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.record.id, a.record.id]);
    }

    #[test]
    fn lookups_stay_correct_after_removing_from_the_middle() {
        let mut l = ScanLedger::new();
        let scans: Vec<_> = (0..50)
            .map(|i| l.register_scan_at("x", ok(&format!("m{}", i % 5)), t(i)))
            .collect();

        for s in scans.iter().step_by(7) {
            assert!(l.remove(s.record.id));
        }
        for (i, s) in scans.iter().enumerate() {
            assert_eq!(l.get(s.record.id).is_some(), i % 7 != 0);
        }

        // Order survives removals; m1's original (t=1) is still live.
        let ids: Vec<_> = l.records().map(|r| r.id).collect();
        assert_eq!(ids.first(), Some(&scans[48].record.id));
        assert_eq!(ids.last(), Some(&scans[1].record.id));
        assert_eq!(l.find_by_subject("m1").map(|r| r.id), Some(scans[1].record.id));
        let late = l.register_scan_at("x", ok("m1"), t(100));
        assert_eq!(late.original.map(|r| r.id), Some(scans[1].record.id));
    }

    #[test]
    fn shared_ledger_serialises_first_sightings() {
        let ledger = SharedLedger::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = ledger.clone();
                std::thread::spawn(move || l.register_scan("x", ok("hal")).is_repeat)
            })
            .collect();
        let originals = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|repeat| !repeat)
            .count();
        assert_eq!(originals, 1);
        assert_eq!(ledger.stats().repeat_count, 7);
    }
}
