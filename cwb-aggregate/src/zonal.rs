//! Zonal statistics: pixel histograms of the area under a polygon.
//!
//! A pixel belongs to a waterbody when its centre lies strictly inside the
//! polygon. Tiles are disjoint, so summing per-tile histograms counts no
//! pixel twice.

use cwb_core::aggregation::PixelHistogram;
use cwb_core::geometry::BoundingBox;
use cwb_core::raster::{TileBounds, TileRaster};
use cwb_core::{CwbError, Result};
use geo::{Contains, MultiPolygon, Point};

/// Add the pixels of `raster` covered by `geometry` to `histogram`.
///
/// `bounds` is the stored georeferencing of the tile; the raster must have
/// the same pixel dimensions.
pub fn accumulate_tile(
    histogram: &mut PixelHistogram,
    geometry: &MultiPolygon<f64>,
    footprint: &BoundingBox,
    bounds: &TileBounds,
    raster: &TileRaster,
) -> Result<()> {
    if raster.header.width != bounds.width || raster.header.height != bounds.height {
        return Err(CwbError::ReadFailure(format!(
            "tile {} is {}x{} pixels but its bounds declare {}x{}",
            bounds.tile_id, raster.header.width, raster.header.height, bounds.width, bounds.height
        )));
    }
    raster.check_dimensions()?;

    let Some((rows, cols)) = bounds.pixel_window(footprint) else {
        return Ok(());
    };
    for row in rows {
        for col in cols.clone() {
            let (x, y) = bounds.pixel_center(row, col);
            if footprint.contains_point(x, y) && geometry.contains(&Point::new(x, y)) {
                histogram.add(raster.pixel(row, col));
            }
        }
    }
    Ok(())
}
