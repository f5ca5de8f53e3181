//! Retry ledger for failed aggregation units.
//!
//! Daily and weekly units live in separate ledgers. A unit that keeps
//! failing is marked permanent after `max_attempts` and stops showing up in
//! [`RetryLedger::pending`] until it is released.

use cwb_core::aggregation::{AggregationUnit, RetryRecord};
use cwb_core::cadence::Cadence;
use cwb_core::{CwbError, FailureKind, Result};
use cwb_db::models::LedgerSummary;
use cwb_db::Database;
use log::warn;
use std::collections::VecDeque;

const PAGE_SIZE: usize = 256;

#[derive(Clone)]
pub struct RetryLedger {
    db: Database,
    max_attempts: u32,
}

impl RetryLedger {
    pub fn new(db: Database, max_attempts: u32) -> Self {
        Self {
            db,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Record a failed attempt. Recording the same unit again increments
    /// its attempt count instead of adding a second record.
    pub fn record(&self, unit: &AggregationUnit, kind: FailureKind, reason: &str) -> Result<RetryRecord> {
        let record = self.db.ledger_record(unit, kind, reason, self.max_attempts)?;
        if record.permanent {
            warn!(
                "{} failed {} times, giving up: {}",
                unit, record.attempts, record.reason
            );
        }
        Ok(record)
    }

    pub fn record_error(&self, unit: &AggregationUnit, error: &CwbError) -> Result<RetryRecord> {
        self.record(unit, error.kind(), &error.to_string())
    }

    /// Record a failure seen inside a slice. A unit already in the ledger
    /// keeps its attempt count; only [`Self::record`] spends attempts.
    pub fn note_error(&self, unit: &AggregationUnit, error: &CwbError) -> Result<RetryRecord> {
        let record = self
            .db
            .ledger_note(unit, error.kind(), &error.to_string(), self.max_attempts)?;
        if record.permanent && record.attempts == 1 {
            warn!("{} failed and allows a single attempt: {}", unit, record.reason);
        }
        Ok(record)
    }

    /// Remove a unit after it succeeded; false if it was not recorded.
    pub fn clear(&self, unit: &AggregationUnit) -> Result<bool> {
        Ok(self.db.ledger_clear(unit)?)
    }

    pub fn get(&self, unit: &AggregationUnit) -> Result<Option<RetryRecord>> {
        Ok(self.db.ledger_get(unit)?)
    }

    /// Lazily walk the pending records of one cadence in key order.
    ///
    /// Records are fetched a page at a time, so the ledger may be modified
    /// while iterating.
    pub fn pending(&self, cadence: Cadence) -> PendingUnits<'_> {
        PendingUnits {
            ledger: self,
            cadence,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn permanently_failed(&self, cadence: Cadence) -> Result<Vec<RetryRecord>> {
        Ok(self.db.ledger_permanent(cadence)?)
    }

    /// Return a permanent failure to pending with a fresh attempt budget.
    pub fn release(&self, unit: &AggregationUnit) -> Result<bool> {
        Ok(self.db.ledger_release(unit)?)
    }

    pub fn summary(&self, cadence: Cadence) -> Result<LedgerSummary> {
        Ok(self.db.ledger_summary(cadence)?)
    }
}

/// Iterator over pending ledger records, see [`RetryLedger::pending`].
pub struct PendingUnits<'a> {
    ledger: &'a RetryLedger,
    cadence: Cadence,
    after: Option<(cwb_core::ObjectId, i32, u32)>,
    buffer: VecDeque<RetryRecord>,
    exhausted: bool,
}

impl Iterator for PendingUnits<'_> {
    type Item = Result<RetryRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self
                .ledger
                .db
                .ledger_pending_page(self.cadence, self.after, PAGE_SIZE)
            {
                Ok(page) => {
                    self.exhausted = page.len() < PAGE_SIZE;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e.into()));
                }
            }
        }
        let record = self.buffer.pop_front()?;
        self.after = Some((record.unit.objectid, record.unit.year, record.unit.day));
        Some(Ok(record))
    }
}
