//! Retry ledger tables, one per cadence.

use crate::models::LedgerSummary;
use crate::Database;
use chrono::Utc;
use cwb_core::aggregation::{AggregationUnit, RetryRecord};
use cwb_core::cadence::Cadence;
use cwb_core::{FailureKind, ObjectId};
use rusqlite::{params, OptionalExtension, Row};

/// Ledger table for a cadence; the two tables never share rows.
fn ledger_table(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Daily => "retry_daily",
        Cadence::Weekly => "retry_weekly",
    }
}

/// Keyset position inside a ledger: `(objectid, year, day)`.
pub type LedgerKey = (ObjectId, i32, u32);

const RECORD_COLUMNS: &str = "objectid, year, day, kind, reason, attempts, permanent";

fn record_from_row(row: &Row<'_>, cadence: Cadence) -> rusqlite::Result<RetryRecord> {
    Ok(RetryRecord {
        unit: AggregationUnit {
            objectid: row.get(0)?,
            year: row.get(1)?,
            day: row.get(2)?,
            cadence,
        },
        kind: FailureKind::from_label(&row.get::<_, String>(3)?),
        reason: row.get(4)?,
        attempts: row.get(5)?,
        permanent: row.get(6)?,
    })
}

impl Database {
    /// Record a failed attempt of `unit`.
    ///
    /// The first failure inserts a record with one attempt; later failures
    /// of the same unit replace the reason and increment the attempt count.
    /// The record turns permanent once attempts reach `max_attempts`.
    pub fn ledger_record(
        &self,
        unit: &AggregationUnit,
        kind: FailureKind,
        reason: &str,
        max_attempts: u32,
    ) -> anyhow::Result<RetryRecord> {
        let table = ledger_table(unit.cadence);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let record = conn.query_row(
            &format!(
                "INSERT INTO {table} (objectid, year, day, kind, reason, attempts, permanent, first_failed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 1 >= ?6, ?7, ?7)
                 ON CONFLICT(objectid, year, day) DO UPDATE SET
                     kind = excluded.kind,
                     reason = excluded.reason,
                     attempts = {table}.attempts + 1,
                     permanent = ({table}.attempts + 1) >= ?6,
                     updated_at = excluded.updated_at
                 RETURNING {RECORD_COLUMNS}"
            ),
            params![
                unit.objectid,
                unit.year,
                unit.day,
                kind.as_str(),
                reason,
                max_attempts,
                now
            ],
            |row| record_from_row(row, unit.cadence),
        )?;
        Ok(record)
    }

    /// Note a failure seen while aggregating a slice.
    ///
    /// A new unit gets a record with one attempt, like [`Self::ledger_record`].
    /// An existing record only has its kind and reason refreshed, so running
    /// the same slice again never spends another attempt.
    pub fn ledger_note(
        &self,
        unit: &AggregationUnit,
        kind: FailureKind,
        reason: &str,
        max_attempts: u32,
    ) -> anyhow::Result<RetryRecord> {
        let table = ledger_table(unit.cadence);
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let record = conn.query_row(
            &format!(
                "INSERT INTO {table} (objectid, year, day, kind, reason, attempts, permanent, first_failed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, 1 >= ?6, ?7, ?7)
                 ON CONFLICT(objectid, year, day) DO UPDATE SET
                     kind = excluded.kind,
                     reason = excluded.reason,
                     attempts = MAX({table}.attempts, 1),
                     updated_at = excluded.updated_at
                 RETURNING {RECORD_COLUMNS}"
            ),
            params![
                unit.objectid,
                unit.year,
                unit.day,
                kind.as_str(),
                reason,
                max_attempts,
                now
            ],
            |row| record_from_row(row, unit.cadence),
        )?;
        Ok(record)
    }

    /// Delete the record of `unit`; returns whether one existed.
    pub fn ledger_clear(&self, unit: &AggregationUnit) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            &format!(
                "DELETE FROM {} WHERE objectid = ?1 AND year = ?2 AND day = ?3",
                ledger_table(unit.cadence)
            ),
            params![unit.objectid, unit.year, unit.day],
        )?;
        Ok(deleted > 0)
    }

    pub fn ledger_get(&self, unit: &AggregationUnit) -> anyhow::Result<Option<RetryRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE objectid = ?1 AND year = ?2 AND day = ?3",
                    RECORD_COLUMNS,
                    ledger_table(unit.cadence)
                ),
                params![unit.objectid, unit.year, unit.day],
                |row| record_from_row(row, unit.cadence),
            )
            .optional()?;
        Ok(record)
    }

    /// Next page of pending (non-permanent) records strictly after `after`.
    pub fn ledger_pending_page(
        &self,
        cadence: Cadence,
        after: Option<LedgerKey>,
        limit: usize,
    ) -> anyhow::Result<Vec<RetryRecord>> {
        let (objectid, year, day) = after.unwrap_or((ObjectId::MIN, i32::MIN, 0));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}
             WHERE permanent = 0 AND (objectid, year, day) > (?1, ?2, ?3)
             ORDER BY objectid, year, day
             LIMIT ?4",
            RECORD_COLUMNS,
            ledger_table(cadence)
        ))?;
        let rows = stmt
            .query_map(params![objectid, year, day, limit as i64], |row| {
                record_from_row(row, cadence)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records that exhausted their attempts.
    pub fn ledger_permanent(&self, cadence: Cadence) -> anyhow::Result<Vec<RetryRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE permanent = 1 ORDER BY objectid, year, day",
            RECORD_COLUMNS,
            ledger_table(cadence)
        ))?;
        let rows = stmt
            .query_map([], |row| record_from_row(row, cadence))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Return a permanent failure to pending with its attempts reset.
    pub fn ledger_release(&self, unit: &AggregationUnit) -> anyhow::Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE {} SET permanent = 0, attempts = 0, updated_at = ?4
                 WHERE objectid = ?1 AND year = ?2 AND day = ?3",
                ledger_table(unit.cadence)
            ),
            params![unit.objectid, unit.year, unit.day, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    pub fn ledger_summary(&self, cadence: Cadence) -> anyhow::Result<LedgerSummary> {
        let conn = self.conn.lock();
        let (pending, permanent): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(permanent = 0), 0), COALESCE(SUM(permanent = 1), 0) FROM {}",
                ledger_table(cadence)
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(LedgerSummary {
            cadence,
            pending: pending as u64,
            permanent: permanent as u64,
        })
    }
}
