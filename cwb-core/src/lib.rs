//! Core types for CyAN waterbody aggregation.
//!
//! Holds the domain model shared by every crate in the workspace together
//! with the interfaces of the three external collaborators:
//!
//! - [`waterbody::WaterbodySource`] - the vector dataset of waterbody polygons
//! - [`raster::RasterSource`] - the daily/weekly tiled imagery
//! - [`aggregation::ResultStore`] - durable storage of aggregated rows

pub mod aggregation;
pub mod cadence;
pub mod error;
pub mod geometry;
pub mod raster;
pub mod waterbody;

pub use error::{CwbError, FailureKind, Result};

/// Waterbody identifier from the vector dataset (`OBJECTID`).
pub type ObjectId = i64;
