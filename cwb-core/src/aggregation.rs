//! Aggregation units, results, retry records, cursors and the result store.

use crate::cadence::{Cadence, ImageDate};
use crate::error::{CwbError, FailureKind, Result};
use crate::ObjectId;
use cwb_utils::dates;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct pixel values in the index raster.
pub const PIXEL_VALUES: usize = 256;
/// Highest pixel value that carries a water-quality index reading.
pub const MAX_VALID_PIXEL: u8 = 253;
/// Pixel value marking land.
pub const LAND_PIXEL: u8 = 254;
/// Pixel value marking missing data (cloud, outside the swath).
pub const NO_DATA_PIXEL: u8 = 255;

/// The atomic piece of aggregation work: one waterbody on one image date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregationUnit {
    pub objectid: ObjectId,
    pub year: i32,
    pub day: u32,
    pub cadence: Cadence,
}

impl AggregationUnit {
    pub fn new(objectid: ObjectId, date: &ImageDate) -> Self {
        Self {
            objectid,
            year: date.year,
            day: date.day,
            cadence: date.cadence,
        }
    }

    pub fn date(&self) -> ImageDate {
        ImageDate {
            year: self.year,
            day: self.day,
            cadence: self.cadence,
        }
    }
}

impl fmt::Display for AggregationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.objectid,
            dates::format_year_day(self.year, self.day),
            self.cadence
        )
    }
}

/// Histogram of pixel values inside a waterbody footprint.
///
/// Counting is order independent, so the histogram is identical however
/// tiles and pixels are visited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelHistogram {
    counts: Vec<u64>,
}

impl Default for PixelHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; PIXEL_VALUES],
        }
    }
}

impl PixelHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from stored counts; there must be exactly 256 bins.
    pub fn from_counts(counts: Vec<u64>) -> Result<Self> {
        if counts.len() != PIXEL_VALUES {
            return Err(CwbError::MalformedInput(format!(
                "histogram has {} bins, expected {}",
                counts.len(),
                PIXEL_VALUES
            )));
        }
        Ok(Self { counts })
    }

    pub fn add(&mut self, value: u8) {
        self.counts[value as usize] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn count(&self, value: u8) -> u64 {
        self.counts[value as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Pixels carrying an index reading (values 0..=253).
    pub fn valid_count(&self) -> u64 {
        self.counts[..=MAX_VALID_PIXEL as usize].iter().sum()
    }

    pub fn land_count(&self) -> u64 {
        self.count(LAND_PIXEL)
    }

    pub fn no_data_count(&self) -> u64 {
        self.count(NO_DATA_PIXEL)
    }

    /// Mean of the valid pixel values, `None` when there are none.
    pub fn mean(&self) -> Option<f64> {
        let valid = self.valid_count();
        if valid == 0 {
            return None;
        }
        let sum: u64 = self.counts[..=MAX_VALID_PIXEL as usize]
            .iter()
            .enumerate()
            .map(|(value, count)| value as u64 * count)
            .sum();
        Some(sum as f64 / valid as f64)
    }

    /// Pixel count inside each inclusive value range.
    pub fn range_counts(&self, ranges: &[ValueRange]) -> Vec<u64> {
        ranges
            .iter()
            .map(|r| self.counts[r.min as usize..=r.max as usize].iter().sum())
            .collect()
    }
}

/// Per-unit summary statistic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "histogram", rename_all = "snake_case")]
pub enum Statistic {
    /// No tile covers the waterbody or no pixel centre falls inside it.
    NoData,
    Histogram(PixelHistogram),
}

impl Statistic {
    /// `NoData` for an empty histogram.
    pub fn from_histogram(histogram: PixelHistogram) -> Self {
        if histogram.total() == 0 {
            Statistic::NoData
        } else {
            Statistic::Histogram(histogram)
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Statistic::NoData)
    }

    pub fn histogram(&self) -> Option<&PixelHistogram> {
        match self {
            Statistic::Histogram(h) => Some(h),
            Statistic::NoData => None,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        self.histogram().and_then(PixelHistogram::mean)
    }
}

/// The stored outcome of one successful unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub objectid: ObjectId,
    pub year: i32,
    pub day: u32,
    pub cadence: Cadence,
    pub statistic: Statistic,
}

impl AggregationResult {
    pub fn new(unit: AggregationUnit, statistic: Statistic) -> Self {
        Self {
            objectid: unit.objectid,
            year: unit.year,
            day: unit.day,
            cadence: unit.cadence,
            statistic,
        }
    }

    pub fn unit(&self) -> AggregationUnit {
        AggregationUnit {
            objectid: self.objectid,
            year: self.year,
            day: self.day,
            cadence: self.cadence,
        }
    }
}

/// A failed unit waiting in the retry ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub unit: AggregationUnit,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
    /// Set once `attempts` reaches the configured limit; excluded from pending.
    pub permanent: bool,
}

/// Resumption marker for a run over the waterbody inventory.
///
/// Keyed on the last processed object id rather than a positional offset,
/// so inserting or removing waterbodies mid-run cannot skip or repeat units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    last_objectid: Option<ObjectId>,
    position: u64,
    completed: bool,
}

impl Cursor {
    /// Cursor at the beginning of the inventory.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn last_objectid(&self) -> Option<ObjectId> {
        self.last_objectid
    }

    /// Number of waterbodies covered so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Cursor moved past a slice of `count` waterbodies ending at `last`.
    pub fn advance(&self, last: Option<ObjectId>, count: usize, completed: bool) -> Self {
        Self {
            last_objectid: last.or(self.last_objectid),
            position: self.position + count as u64,
            completed,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.completed {
            write!(f, "[{}, completed]", self.position)
        } else {
            write!(f, "[{}]", self.position)
        }
    }
}

/// Inclusive range of pixel values used to bin query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u8,
    pub max: u8,
}

impl ValueRange {
    pub fn new(min: u8, max: u8) -> Result<Self> {
        if min > max {
            return Err(CwbError::MalformedInput(format!(
                "value range {}..={} is empty",
                min, max
            )));
        }
        Ok(Self { min, max })
    }
}

/// Range query over stored results of one waterbody.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultQuery {
    pub objectid: ObjectId,
    pub cadence: Cadence,
    /// Inclusive `(year, day)` lower bound.
    pub start: Option<(i32, u32)>,
    /// Inclusive `(year, day)` upper bound.
    pub end: Option<(i32, u32)>,
    pub value_ranges: Option<Vec<ValueRange>>,
}

impl ResultQuery {
    pub fn new(objectid: ObjectId, cadence: Cadence) -> Self {
        Self {
            objectid,
            cadence,
            start: None,
            end: None,
            value_ranges: None,
        }
    }

    /// Lower bound; a missing day means the start of the year.
    pub fn starting(mut self, year: i32, day: Option<u32>) -> Self {
        self.start = Some((year, day.unwrap_or(1)));
        self
    }

    /// Upper bound; a missing day means the end of the year.
    pub fn ending(mut self, year: i32, day: Option<u32>) -> Self {
        self.end = Some((year, day.unwrap_or(366)));
        self
    }

    pub fn with_ranges(mut self, ranges: Vec<ValueRange>) -> Self {
        self.value_ranges = Some(ranges);
        self
    }

    /// Inclusive ordinal key bounds, see [`dates::ordinal_key`].
    pub fn ordinal_bounds(&self) -> (i64, i64) {
        let lo = self.start.map_or(i64::MIN, |(y, d)| dates::ordinal_key(y, d));
        let hi = self.end.map_or(i64::MAX, |(y, d)| dates::ordinal_key(y, d));
        (lo, hi)
    }
}

/// A stored result plus its pixel counts per requested value range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueriedResult {
    #[serde(flatten)]
    pub result: AggregationResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub range_counts: Vec<u64>,
}

impl QueriedResult {
    pub fn new(result: AggregationResult, ranges: Option<&[ValueRange]>) -> Self {
        let range_counts = match (ranges, result.statistic.histogram()) {
            (Some(ranges), Some(h)) => h.range_counts(ranges),
            (Some(ranges), None) => vec![0; ranges.len()],
            (None, _) => Vec::new(),
        };
        Self {
            result,
            range_counts,
        }
    }
}

/// Durable storage of aggregation results.
pub trait ResultStore: Send + Sync {
    /// Upsert by `(objectid, year, day, cadence)`; all rows or none.
    fn save_results(&self, results: &[AggregationResult]) -> Result<()>;

    /// Results of one waterbody ordered by `(year, day)`.
    fn query_results(&self, query: &ResultQuery) -> Result<Vec<QueriedResult>>;
}
