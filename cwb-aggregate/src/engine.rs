//! Slice-wise zonal aggregation over the waterbody inventory.
//!
//! A run for one image date walks the inventory in object id order, one
//! slice per call. Each slice aggregates its waterbodies independently:
//! units that fail are recorded in the retry ledger and left out of the
//! slice's results, while storage failures abort the slice.

use crate::config::{ExecutionMode, PipelineConfig};
use crate::ledger::RetryLedger;
use crate::snapshot::TileSnapshot;
use crate::zonal;
use cwb_core::aggregation::{
    AggregationResult, AggregationUnit, Cursor, PixelHistogram, ResultStore, RetryRecord, Statistic,
};
use cwb_core::cadence::{Cadence, GenerationKey, ImageDate};
use cwb_core::raster::RasterSource;
use cwb_core::waterbody::{Waterbody, WaterbodySource};
use cwb_core::{CwbError, FailureKind, ObjectId, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::sync::Arc;

/// A unit that failed during a slice and was written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub unit: AggregationUnit,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
}

impl From<RetryRecord> for UnitFailure {
    fn from(record: RetryRecord) -> Self {
        Self {
            unit: record.unit,
            kind: record.kind,
            reason: record.reason,
            attempts: record.attempts,
        }
    }
}

/// What one slice produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SliceOutcome {
    pub results: Vec<AggregationResult>,
    pub failures: Vec<UnitFailure>,
    /// Where the next slice starts.
    pub cursor: Cursor,
}

impl SliceOutcome {
    pub fn completed(&self) -> bool {
        self.cursor.is_completed()
    }
}

/// Outcome of a retry pass over one cadence's ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryReport {
    pub cadence: Cadence,
    pub attempted: usize,
    pub recovered: Vec<AggregationResult>,
    pub still_failing: Vec<RetryRecord>,
    /// Units that reached the attempt limit during this pass.
    pub permanently_failed: Vec<RetryRecord>,
}

impl RetryReport {
    fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            attempted: 0,
            recovered: Vec::new(),
            still_failing: Vec::new(),
            permanently_failed: Vec::new(),
        }
    }
}

enum UnitOutcome {
    Aggregated(AggregationResult),
    Failed(UnitFailure),
}

pub struct AggregationEngine {
    inventory: Arc<dyn WaterbodySource>,
    raster: Arc<dyn RasterSource>,
    ledger: RetryLedger,
    snapshot: Arc<TileSnapshot>,
    config: PipelineConfig,
    pool: Option<ThreadPool>,
}

impl AggregationEngine {
    pub fn new(
        inventory: Arc<dyn WaterbodySource>,
        raster: Arc<dyn RasterSource>,
        ledger: RetryLedger,
        snapshot: Arc<TileSnapshot>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let pool = config.build_pool()?;
        Ok(Self {
            inventory,
            raster,
            ledger,
            snapshot,
            config,
            pool,
        })
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Swap in a freshly captured snapshot after the index or bounds changed.
    pub fn set_snapshot(&mut self, snapshot: Arc<TileSnapshot>) {
        self.snapshot = snapshot;
    }

    /// Aggregate the slice of waterbodies following `cursor` (the start of
    /// the inventory when `None`) for one image date.
    ///
    /// Passing a completed cursor returns an empty, completed outcome.
    /// Repeating a call with the same cursor yields the same results.
    pub fn run(
        &self,
        year: i32,
        day: u32,
        cadence: Cadence,
        cursor: Option<&Cursor>,
    ) -> Result<SliceOutcome> {
        let date = ImageDate::new(year, day, cadence)?;
        let cursor = cursor.copied().unwrap_or_default();
        if cursor.is_completed() {
            return Ok(SliceOutcome {
                results: Vec::new(),
                failures: Vec::new(),
                cursor,
            });
        }

        let generation = self.resolve_generation(&date)?;
        let slice_size = self.config.slice_size;
        let mut batch = self
            .inventory
            .waterbodies_after(cursor.last_objectid(), slice_size + 1)?;
        let completed = batch.len() <= slice_size;
        batch.truncate(slice_size);

        let process = |wb: &Waterbody| self.process_unit(wb, &date, generation);
        let outcomes = match (&self.pool, self.config.mode) {
            (Some(pool), ExecutionMode::Parallel) => {
                pool.install(|| batch.par_iter().map(process).collect::<Result<Vec<_>>>())?
            }
            _ => batch.iter().map(process).collect::<Result<Vec<_>>>()?,
        };

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Aggregated(result) => results.push(result),
                UnitOutcome::Failed(failure) => failures.push(failure),
            }
        }

        let next = cursor.advance(batch.last().map(|wb| wb.objectid), batch.len(), completed);
        info!(
            "Aggregated {} {} -> {}: {} results, {} failures",
            date,
            cursor,
            next,
            results.len(),
            failures.len()
        );
        Ok(SliceOutcome {
            results,
            failures,
            cursor: next,
        })
    }

    /// Aggregate a single waterbody, ledgering the failure if it fails.
    pub fn aggregate_one(&self, objectid: ObjectId, year: i32, day: u32, cadence: Cadence) -> Result<AggregationResult> {
        let date = ImageDate::new(year, day, cadence)?;
        let unit = AggregationUnit::new(objectid, &date);
        self.attempt(&unit).or_else(|e| {
            if !e.is_storage() {
                self.ledger.record_error(&unit, &e)?;
            }
            Err(e)
        })
    }

    /// Re-attempt every pending unit of `cadence`.
    ///
    /// A recovered unit is saved to `store` before its ledger record is
    /// cleared; units that fail again have their attempt count increased.
    pub fn retry_failed(&self, cadence: Cadence, store: &dyn ResultStore) -> Result<RetryReport> {
        let mut report = RetryReport::new(cadence);
        for record in self.ledger.pending(cadence) {
            let record = record?;
            let unit = record.unit;
            report.attempted += 1;
            match self.attempt(&unit) {
                Ok(result) => {
                    store.save_results(std::slice::from_ref(&result))?;
                    self.ledger.clear(&unit)?;
                    debug!("Recovered {}", unit);
                    report.recovered.push(result);
                }
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    let updated = self.ledger.record_error(&unit, &e)?;
                    if updated.permanent {
                        report.permanently_failed.push(updated);
                    } else {
                        report.still_failing.push(updated);
                    }
                }
            }
        }
        info!(
            "Retried {} {} units: {} recovered, {} still failing, {} permanently failed",
            report.attempted,
            cadence,
            report.recovered.len(),
            report.still_failing.len(),
            report.permanently_failed.len()
        );
        Ok(report)
    }

    /// Zonal statistic of one waterbody on one date using `generation`'s
    /// georeferencing. Touches no storage.
    pub fn aggregate_unit(
        &self,
        waterbody: &Waterbody,
        date: &ImageDate,
        generation: GenerationKey,
    ) -> Result<AggregationResult> {
        let unit = AggregationUnit::new(waterbody.objectid, date);
        waterbody.validate()?;
        let tiles = self.snapshot.assignments_for(waterbody.objectid).ok_or_else(|| {
            CwbError::NotFound(format!(
                "waterbody {} has no tile assignment, rebuild the tile index",
                waterbody.objectid
            ))
        })?;
        let Some(footprint) = waterbody.bbox() else {
            return Ok(AggregationResult::new(unit, Statistic::NoData));
        };

        let mut histogram = PixelHistogram::new();
        for tile in tiles {
            let bounds = self.snapshot.bounds_of(generation, tile)?;
            if let (Some(wb_crs), Some(tile_crs)) = (&waterbody.crs, &bounds.crs) {
                if wb_crs != tile_crs {
                    return Err(CwbError::MalformedInput(format!(
                        "waterbody {} is in {} but tile {} is in {}",
                        waterbody.objectid, wb_crs, tile, tile_crs
                    )));
                }
            }
            let raster = self.raster.read_tile(date, tile)?;
            zonal::accumulate_tile(&mut histogram, &waterbody.geometry, &footprint, bounds, &raster)?;
        }
        Ok(AggregationResult::new(unit, Statistic::from_histogram(histogram)))
    }

    fn resolve_generation(&self, date: &ImageDate) -> Result<GenerationKey> {
        if !self.raster.has_imagery(date)? {
            return Err(CwbError::MissingReference {
                year: date.year,
                day: date.day,
            });
        }
        self.snapshot.generation_for(date)
    }

    /// Aggregate one unit outside a slice, looking everything up by id.
    fn attempt(&self, unit: &AggregationUnit) -> Result<AggregationResult> {
        let date = unit.date();
        let waterbody = self
            .inventory
            .get(unit.objectid)?
            .ok_or_else(|| CwbError::NotFound(format!("waterbody {}", unit.objectid)))?;
        let generation = self.resolve_generation(&date)?;
        self.aggregate_unit(&waterbody, &date, generation)
    }

    fn process_unit(
        &self,
        waterbody: &Waterbody,
        date: &ImageDate,
        generation: GenerationKey,
    ) -> Result<UnitOutcome> {
        match self.aggregate_unit(waterbody, date, generation) {
            Ok(result) => Ok(UnitOutcome::Aggregated(result)),
            Err(e) if e.is_storage() => Err(e),
            Err(e) => {
                let unit = AggregationUnit::new(waterbody.objectid, date);
                warn!("{} failed: {}", unit, e);
                let record = self.ledger.note_error(&unit, &e)?;
                Ok(UnitOutcome::Failed(record.into()))
            }
        }
    }
}
