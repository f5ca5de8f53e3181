//! Drives a full run for one image date: slice after slice, persisting each
//! slice's results before moving the cursor.

use crate::engine::{AggregationEngine, UnitFailure};
use cwb_core::aggregation::{AggregationResult, Cursor, ResultStore};
use cwb_core::cadence::Cadence;
use cwb_core::CwbError;
use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// A slice whose results are stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedSlice {
    pub results: Vec<AggregationResult>,
    pub failures: Vec<UnitFailure>,
    pub cursor: Cursor,
}

impl PersistedSlice {
    pub fn completed(&self) -> bool {
        self.cursor.is_completed()
    }
}

/// A run stopped by an error. `last_cursor` is the last cursor whose slice
/// was fully persisted; resuming from it repeats no stored work.
#[derive(Debug, Error)]
#[error("aggregation of {year}-{day:03} {cadence} aborted at {last_cursor}: {source}")]
pub struct RunAborted {
    pub year: i32,
    pub day: u32,
    pub cadence: Cadence,
    pub last_cursor: Cursor,
    #[source]
    pub source: CwbError,
}

/// Totals of a finished or cancelled run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub slices: usize,
    pub results: usize,
    pub failures: usize,
    pub cursor: Cursor,
    pub cancelled: bool,
}

/// Iterator over the persisted slices of one run.
pub struct AggregationRun<'a> {
    engine: &'a AggregationEngine,
    store: &'a dyn ResultStore,
    year: i32,
    day: u32,
    cadence: Cadence,
    cursor: Cursor,
    cancel: Option<Arc<AtomicBool>>,
    cancelled: bool,
    finished: bool,
}

impl<'a> AggregationRun<'a> {
    pub fn new(
        engine: &'a AggregationEngine,
        store: &'a dyn ResultStore,
        year: i32,
        day: u32,
        cadence: Cadence,
    ) -> Self {
        Self {
            engine,
            store,
            year,
            day,
            cadence,
            cursor: Cursor::start(),
            cancel: None,
            cancelled: false,
            finished: false,
        }
    }

    /// Continue an earlier run from its last persisted cursor.
    pub fn resume_from(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Stop before the next slice once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Cursor after the last persisted slice.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Drive every remaining slice.
    pub fn run_to_completion(mut self) -> Result<RunSummary, RunAborted> {
        let started = Instant::now();
        let mut summary = RunSummary {
            slices: 0,
            results: 0,
            failures: 0,
            cursor: self.cursor,
            cancelled: false,
        };
        for slice in self.by_ref() {
            let slice = slice?;
            summary.slices += 1;
            summary.results += slice.results.len();
            summary.failures += slice.failures.len();
        }
        summary.cursor = self.cursor;
        summary.cancelled = self.cancelled;
        info!(
            "Run {}-{:03} {} finished in {:.2?}: {} slices, {} results, {} failures{}",
            self.year,
            self.day,
            self.cadence,
            started.elapsed(),
            summary.slices,
            summary.results,
            summary.failures,
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }

    fn abort(&mut self, source: CwbError) -> RunAborted {
        self.finished = true;
        RunAborted {
            year: self.year,
            day: self.day,
            cadence: self.cadence,
            last_cursor: self.cursor,
            source,
        }
    }

    fn step(&mut self) -> Result<PersistedSlice, CwbError> {
        let outcome = self
            .engine
            .run(self.year, self.day, self.cadence, Some(&self.cursor))?;
        self.store.save_results(&outcome.results)?;
        for result in &outcome.results {
            self.engine.ledger().clear(&result.unit())?;
        }
        Ok(PersistedSlice {
            results: outcome.results,
            failures: outcome.failures,
            cursor: outcome.cursor,
        })
    }
}

impl Iterator for AggregationRun<'_> {
    type Item = Result<PersistedSlice, RunAborted>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.cursor.is_completed() {
            return None;
        }
        if self.cancel.as_ref().is_some_and(|f| f.load(Ordering::SeqCst)) {
            info!("Run cancelled at {}", self.cursor);
            self.cancelled = true;
            self.finished = true;
            return None;
        }
        match self.step() {
            Ok(slice) => {
                self.cursor = slice.cursor;
                self.finished = slice.completed();
                Some(Ok(slice))
            }
            Err(e) => Some(Err(self.abort(e))),
        }
    }
}
