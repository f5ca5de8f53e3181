//! Zonal aggregation pipeline for waterbody imagery.
//!
//! The pieces, in the order a deployment sets them up:
//!
//! - [`TileBoundsRegistry`] stores each generation's tile footprints read
//!   from its reference raster.
//! - [`TileIndex`] assigns each waterbody the tiles its polygon overlaps.
//! - [`TileSnapshot`] freezes both for the duration of a run.
//! - [`AggregationEngine`] computes per-waterbody statistics slice by slice
//!   and retries failed units from the [`RetryLedger`].
//! - [`AggregationRun`] persists slices and resumes from a [`Cursor`].
//!
//! [`Cursor`]: cwb_core::aggregation::Cursor

pub mod config;
pub mod driver;
pub mod engine;
pub mod ledger;
pub mod snapshot;
pub mod tile_bounds;
pub mod tile_index;
pub mod zonal;

pub use config::{ExecutionMode, PipelineConfig};
pub use driver::{AggregationRun, PersistedSlice, RunAborted, RunSummary};
pub use engine::{AggregationEngine, RetryReport, SliceOutcome, UnitFailure};
pub use ledger::RetryLedger;
pub use snapshot::TileSnapshot;
pub use tile_bounds::TileBoundsRegistry;
pub use tile_index::{IndexReport, TileIndex};
