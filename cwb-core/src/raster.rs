//! Tiled raster imagery: tile identifiers, tile headers and pixel sources.
//!
//! Imagery for one [`ImageDate`] is a set of tiles on a regular grid. Each
//! tile carries its own bounding box and pixel dimensions, and its pixels are
//! stored row-major starting at the north-west corner. Decoding actual image
//! formats is left to implementations of [`RasterSource`].

use crate::cadence::ImageDate;
use crate::error::{CwbError, Result};
use crate::geometry::BoundingBox;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

/// Identifier of one tile in the raster grid (e.g. `"1_2"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(pub String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        TileId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Footprint and pixel geometry of one tile within one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileBounds {
    pub tile_id: TileId,
    pub bounds: BoundingBox,
    /// Pixel columns.
    pub width: u32,
    /// Pixel rows.
    pub height: u32,
    /// Pixel size along x.
    pub res_x: f64,
    /// Pixel size along y.
    pub res_y: f64,
    #[serde(default)]
    pub crs: Option<String>,
}

impl TileBounds {
    /// Build bounds for a `width` x `height` tile; resolution is derived.
    pub fn new(tile_id: TileId, bounds: BoundingBox, width: u32, height: u32) -> Self {
        let res_x = if width > 0 { bounds.width() / f64::from(width) } else { 0.0 };
        let res_y = if height > 0 { bounds.height() / f64::from(height) } else { 0.0 };
        Self {
            tile_id,
            bounds,
            width,
            height,
            res_x,
            res_y,
            crs: None,
        }
    }

    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.bounds.is_valid() || self.width == 0 || self.height == 0 {
            return Err(CwbError::MalformedInput(format!(
                "tile {} has degenerate bounds or dimensions",
                self.tile_id
            )));
        }
        if !(self.res_x > 0.0 && self.res_y > 0.0) {
            return Err(CwbError::MalformedInput(format!(
                "tile {} has non-positive resolution",
                self.tile_id
            )));
        }
        Ok(())
    }

    /// Rows and columns whose pixels may overlap `area`, clamped to the tile.
    pub fn pixel_window(&self, area: &BoundingBox) -> Option<(Range<usize>, Range<usize>)> {
        let overlap = self.bounds.intersection(area)?;
        let clamp = |v: f64, max: u32| -> usize { v.max(0.0).min(f64::from(max)) as usize };
        let col_start = clamp(((overlap.min_x - self.bounds.min_x) / self.res_x).floor(), self.width);
        let col_end = clamp(((overlap.max_x - self.bounds.min_x) / self.res_x).ceil(), self.width);
        let row_start = clamp(((self.bounds.max_y - overlap.max_y) / self.res_y).floor(), self.height);
        let row_end = clamp(((self.bounds.max_y - overlap.min_y) / self.res_y).ceil(), self.height);
        if col_start >= col_end || row_start >= row_end {
            return None;
        }
        Some((row_start..row_end, col_start..col_end))
    }

    /// Geographic centre of the pixel at `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.bounds.min_x + (col as f64 + 0.5) * self.res_x,
            self.bounds.max_y - (row as f64 + 0.5) * self.res_y,
        )
    }
}

/// Header plus row-major pixel values of one tile image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRaster {
    pub header: TileBounds,
    pub pixels: Vec<u8>,
}

impl TileRaster {
    pub fn new(header: TileBounds, pixels: Vec<u8>) -> Result<Self> {
        let raster = Self { header, pixels };
        raster.check_dimensions()?;
        Ok(raster)
    }

    /// A tile with every pixel set to `value`.
    pub fn filled(header: TileBounds, value: u8) -> Self {
        let len = header.width as usize * header.height as usize;
        Self {
            header,
            pixels: vec![value; len],
        }
    }

    pub fn check_dimensions(&self) -> Result<()> {
        let expected = self.header.width as usize * self.header.height as usize;
        if self.pixels.len() != expected {
            return Err(CwbError::ReadFailure(format!(
                "tile {} holds {} pixels, header declares {}x{}",
                self.header.tile_id,
                self.pixels.len(),
                self.header.width,
                self.header.height
            )));
        }
        Ok(())
    }

    pub fn pixel(&self, row: usize, col: usize) -> u8 {
        self.pixels[row * self.header.width as usize + col]
    }
}

/// Source of tiled imagery for daily and weekly image dates.
///
/// Implementations must be shareable across worker threads; reads may block.
pub trait RasterSource: Send + Sync {
    /// True when any tile exists for `date`.
    fn has_imagery(&self, date: &ImageDate) -> Result<bool>;

    /// All tile ids for `date`, sorted. `MissingReference` when there is no imagery.
    fn tile_ids(&self, date: &ImageDate) -> Result<Vec<TileId>>;

    /// Read one tile image.
    fn read_tile(&self, date: &ImageDate, tile: &TileId) -> Result<TileRaster>;

    /// Read only the header of one tile.
    fn read_header(&self, date: &ImageDate, tile: &TileId) -> Result<TileBounds> {
        Ok(self.read_tile(date, tile)?.header)
    }
}

/// Thread-safe in-memory imagery.
#[derive(Debug, Default)]
pub struct MemoryRaster {
    tiles: RwLock<BTreeMap<ImageDate, BTreeMap<TileId, TileRaster>>>,
}

impl MemoryRaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tile image for `date`.
    pub fn insert_tile(&self, date: ImageDate, raster: TileRaster) {
        self.tiles
            .write()
            .entry(date)
            .or_default()
            .insert(raster.header.tile_id.clone(), raster);
    }

    /// Remove a tile image, returning it if present.
    pub fn remove_tile(&self, date: &ImageDate, tile: &TileId) -> Option<TileRaster> {
        let mut tiles = self.tiles.write();
        let removed = tiles.get_mut(date).and_then(|t| t.remove(tile));
        if tiles.get(date).is_some_and(|t| t.is_empty()) {
            tiles.remove(date);
        }
        removed
    }
}

impl RasterSource for MemoryRaster {
    fn has_imagery(&self, date: &ImageDate) -> Result<bool> {
        Ok(self.tiles.read().contains_key(date))
    }

    fn tile_ids(&self, date: &ImageDate) -> Result<Vec<TileId>> {
        self.tiles
            .read()
            .get(date)
            .map(|t| t.keys().cloned().collect())
            .ok_or(CwbError::MissingReference {
                year: date.year,
                day: date.day,
            })
    }

    fn read_tile(&self, date: &ImageDate, tile: &TileId) -> Result<TileRaster> {
        let tiles = self.tiles.read();
        let raster = tiles
            .get(date)
            .and_then(|t| t.get(tile))
            .ok_or_else(|| CwbError::NotFound(format!("tile {} for {}", tile, date)))?;
        raster.check_dimensions()?;
        Ok(raster.clone())
    }
}

/// Imagery stored as one JSON document per tile.
///
/// Layout: `<root>/<daily|weekly>/<year>/<day:03>/<tile_id>.json`, each file
/// holding a serialized [`TileRaster`].
#[derive(Debug, Clone)]
pub struct RasterDirectory {
    root: PathBuf,
}

impl RasterDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn date_dir(&self, date: &ImageDate) -> PathBuf {
        self.root
            .join(date.cadence.as_str())
            .join(date.year.to_string())
            .join(format!("{:03}", date.day))
    }

    fn tile_path(&self, date: &ImageDate, tile: &TileId) -> PathBuf {
        self.date_dir(date).join(format!("{}.json", tile))
    }

    /// Write one tile image, creating directories as needed.
    pub fn write_tile(&self, date: &ImageDate, raster: &TileRaster) -> Result<()> {
        let dir = self.date_dir(date);
        std::fs::create_dir_all(&dir)?;
        let body = serde_json::to_string(raster)?;
        std::fs::write(self.tile_path(date, &raster.header.tile_id), body)?;
        Ok(())
    }
}

impl RasterSource for RasterDirectory {
    fn has_imagery(&self, date: &ImageDate) -> Result<bool> {
        match self.tile_ids(date) {
            Ok(ids) => Ok(!ids.is_empty()),
            Err(CwbError::MissingReference { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn tile_ids(&self, date: &ImageDate) -> Result<Vec<TileId>> {
        let dir = self.date_dir(date);
        if !dir.is_dir() {
            return Err(CwbError::MissingReference {
                year: date.year,
                day: date.day,
            });
        }
        let mut ids: Vec<TileId> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("json"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(TileId::new))
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn read_tile(&self, date: &ImageDate, tile: &TileId) -> Result<TileRaster> {
        let path = self.tile_path(date, tile);
        if !path.is_file() {
            return Err(CwbError::NotFound(format!("tile {} for {}", tile, date)));
        }
        let body = std::fs::read_to_string(&path)
            .map_err(|e| CwbError::ReadFailure(format!("{}: {}", path.display(), e)))?;
        let mut raster: TileRaster = serde_json::from_str(&body)
            .map_err(|e| CwbError::ReadFailure(format!("{}: {}", path.display(), e)))?;
        raster.header.tile_id = tile.clone();
        raster.check_dimensions()?;
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadence::Cadence;

    fn header(id: &str) -> TileBounds {
        TileBounds::new(TileId::new(id), BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10)
    }

    fn date() -> ImageDate {
        ImageDate::new(2024, 200, Cadence::Daily).unwrap()
    }

    #[test]
    fn resolution_is_derived() {
        let h = TileBounds::new(TileId::new("a"), BoundingBox::new(0.0, 0.0, 20.0, 10.0), 10, 5);
        assert_eq!(h.res_x, 2.0);
        assert_eq!(h.res_y, 2.0);
        assert!(h.validate().is_ok());
        let empty = TileBounds::new(TileId::new("b"), BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0, 5);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn pixel_window_clamps_to_tile() {
        let h = header("a");
        let (rows, cols) = h.pixel_window(&BoundingBox::new(2.5, 7.5, 20.0, 20.0)).unwrap();
        assert_eq!(cols, 2..10);
        assert_eq!(rows, 0..3);
        assert!(h.pixel_window(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)).is_none());
    }

    #[test]
    fn pixel_center_starts_north_west() {
        let h = header("a");
        assert_eq!(h.pixel_center(0, 0), (0.5, 9.5));
        assert_eq!(h.pixel_center(9, 9), (9.5, 0.5));
    }

    #[test]
    fn raster_rejects_wrong_pixel_count() {
        assert!(matches!(
            TileRaster::new(header("a"), vec![0; 5]),
            Err(CwbError::ReadFailure(_))
        ));
        assert!(TileRaster::new(header("a"), vec![0; 100]).is_ok());
    }

    #[test]
    fn memory_raster_tracks_dates() {
        let raster = MemoryRaster::new();
        assert!(!raster.has_imagery(&date()).unwrap());
        assert!(matches!(
            raster.tile_ids(&date()),
            Err(CwbError::MissingReference { year: 2024, day: 200 })
        ));

        raster.insert_tile(date(), TileRaster::filled(header("b"), 3));
        raster.insert_tile(date(), TileRaster::filled(header("a"), 3));
        assert_eq!(raster.tile_ids(&date()).unwrap(), vec![TileId::new("a"), TileId::new("b")]);
        assert_eq!(raster.read_tile(&date(), &TileId::new("a")).unwrap().pixel(0, 0), 3);
        assert!(matches!(
            raster.read_tile(&date(), &TileId::new("c")),
            Err(CwbError::NotFound(_))
        ));

        raster.remove_tile(&date(), &TileId::new("a"));
        raster.remove_tile(&date(), &TileId::new("b"));
        assert!(!raster.has_imagery(&date()).unwrap());
    }

    #[test]
    fn raster_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source = RasterDirectory::new(dir.path());
        assert!(!source.has_imagery(&date()).unwrap());

        let tile = TileRaster::filled(header("1_2").with_crs("EPSG:5070"), 42);
        source.write_tile(&date(), &tile).unwrap();

        assert!(source.has_imagery(&date()).unwrap());
        assert_eq!(source.tile_ids(&date()).unwrap(), vec![TileId::new("1_2")]);
        let read = source.read_tile(&date(), &TileId::new("1_2")).unwrap();
        assert_eq!(read, tile);
        assert_eq!(
            source.read_header(&date(), &TileId::new("1_2")).unwrap().crs.as_deref(),
            Some("EPSG:5070")
        );
    }

    #[test]
    fn raster_directory_unreadable_tile() {
        let dir = tempfile::tempdir().unwrap();
        let source = RasterDirectory::new(dir.path());
        let tile_dir = dir.path().join("daily").join("2024").join("200");
        std::fs::create_dir_all(&tile_dir).unwrap();
        std::fs::write(tile_dir.join("bad.json"), "not json").unwrap();
        assert!(matches!(
            source.read_tile(&date(), &TileId::new("bad")),
            Err(CwbError::ReadFailure(_))
        ));
    }
}
