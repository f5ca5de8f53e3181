//! Registry of tile bounds, one set per generation.
//!
//! A generation's bounds come from the tile headers of its reference raster
//! (the daily imagery of the generation's own date). Once stored they are
//! the georeferencing used for every image date the generation covers.

use cwb_core::cadence::{self, GenerationKey, ImageDate};
use cwb_core::raster::{RasterSource, TileBounds, TileId};
use cwb_core::{CwbError, Result};
use cwb_db::Database;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct TileBoundsRegistry {
    db: Database,
    raster: Arc<dyn RasterSource>,
}

impl TileBoundsRegistry {
    pub fn new(db: Database, raster: Arc<dyn RasterSource>) -> Self {
        Self { db, raster }
    }

    /// Read every tile header of `generation`'s reference raster and store
    /// them as that generation's bounds, replacing any earlier set.
    ///
    /// Nothing is written unless every header could be read and validated.
    pub fn set_bounds(&self, generation: GenerationKey) -> Result<Vec<TileBounds>> {
        let reference = generation.reference_date();
        let missing = CwbError::MissingReference {
            year: generation.year,
            day: generation.day,
        };

        let tile_ids = match self.raster.tile_ids(&reference) {
            Ok(ids) if !ids.is_empty() => ids,
            Ok(_) => return Err(missing),
            Err(e) => {
                warn!("Reference raster {} unavailable: {}", generation, e);
                return Err(missing);
            }
        };

        let mut headers = Vec::with_capacity(tile_ids.len());
        for tile_id in &tile_ids {
            let header = self
                .raster
                .read_header(&reference, tile_id)
                .and_then(|mut h| {
                    h.tile_id = tile_id.clone();
                    h.validate()?;
                    Ok(h)
                });
            match header {
                Ok(h) => headers.push(h),
                Err(e) => {
                    warn!("Reference tile {} of {} unreadable: {}", tile_id, generation, e);
                    return Err(missing);
                }
            }
        }

        self.db.replace_tile_bounds(generation, &headers)?;
        info!("Set {} tile bounds for generation {}", headers.len(), generation);
        Ok(headers)
    }

    /// Stored bounds of one tile; `NotFound` when absent.
    pub fn bounds_of(&self, generation: GenerationKey, tile: &TileId) -> Result<TileBounds> {
        self.db.tile_bounds(generation, tile)?.ok_or_else(|| {
            CwbError::NotFound(format!("tile {} has no bounds in generation {}", tile, generation))
        })
    }

    pub fn generation_bounds(&self, generation: GenerationKey) -> Result<Vec<TileBounds>> {
        Ok(self.db.generation_bounds(generation)?)
    }

    pub fn generations(&self) -> Result<Vec<GenerationKey>> {
        Ok(self.db.generations()?)
    }

    /// The generation in effect on `date`: the latest one on or before it.
    pub fn generation_for(&self, date: &ImageDate) -> Result<GenerationKey> {
        let generations = self.generations()?;
        cadence::generation_for(&generations, date).ok_or(CwbError::MissingReference {
            year: date.year,
            day: date.day,
        })
    }

    /// Bounds of every stored generation.
    pub fn all_bounds(&self) -> Result<BTreeMap<GenerationKey, Vec<TileBounds>>> {
        let mut all = BTreeMap::new();
        for generation in self.generations()? {
            all.insert(generation, self.generation_bounds(generation)?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwb_core::cadence::Cadence;
    use cwb_core::geometry::BoundingBox;
    use cwb_core::raster::{MemoryRaster, TileRaster};

    fn generation_key(year: i32, day: u32) -> GenerationKey {
        GenerationKey::new(year, day).unwrap()
    }

    fn tile(id: &str, min_x: f64) -> TileRaster {
        let bounds = TileBounds::new(
            TileId::new(id),
            BoundingBox::new(min_x, 0.0, min_x + 10.0, 10.0),
            10,
            10,
        );
        TileRaster::filled(bounds, 0)
    }

    fn registry() -> (TileBoundsRegistry, Arc<MemoryRaster>, Database) {
        let db = Database::new().unwrap();
        let raster = Arc::new(MemoryRaster::new());
        (TileBoundsRegistry::new(db.clone(), raster.clone()), raster, db)
    }

    #[test]
    fn set_bounds_reads_reference_headers() {
        let (registry, raster, _db) = registry();
        let reference = generation_key(2024, 1).reference_date();
        raster.insert_tile(reference, tile("a", 0.0));
        raster.insert_tile(reference, tile("b", 10.0));

        let stored = registry.set_bounds(generation_key(2024, 1)).unwrap();
        assert_eq!(stored.len(), 2);
        let b = registry.bounds_of(generation_key(2024, 1), &TileId::new("b")).unwrap();
        assert_eq!(b.bounds.min_x, 10.0);

        // Setting twice leaves the same records.
        registry.set_bounds(generation_key(2024, 1)).unwrap();
        assert_eq!(registry.generation_bounds(generation_key(2024, 1)).unwrap(), stored);
    }

    #[test]
    fn missing_reference_writes_nothing() {
        let (registry, _raster, db) = registry();
        let err = registry.set_bounds(generation_key(2024, 9)).unwrap_err();
        assert!(matches!(err, CwbError::MissingReference { year: 2024, day: 9 }));
        assert!(db.generations().unwrap().is_empty());
    }

    #[test]
    fn weekly_imagery_is_not_a_reference() {
        let (registry, raster, _db) = registry();
        let weekly = ImageDate::new(2024, 1, Cadence::Weekly).unwrap();
        raster.insert_tile(weekly, tile("a", 0.0));
        assert!(registry.set_bounds(generation_key(2024, 1)).is_err());
    }

    #[test]
    fn unknown_tile_is_not_found() {
        let (registry, raster, _db) = registry();
        raster.insert_tile(generation_key(2024, 1).reference_date(), tile("a", 0.0));
        registry.set_bounds(generation_key(2024, 1)).unwrap();
        let err = registry.bounds_of(generation_key(2024, 1), &TileId::new("z")).unwrap_err();
        assert!(matches!(err, CwbError::NotFound(_)));
    }

    #[test]
    fn generation_for_picks_latest_on_or_before() {
        let (registry, raster, _db) = registry();
        for g in [generation_key(2024, 1), generation_key(2024, 150)] {
            raster.insert_tile(g.reference_date(), tile("a", 0.0));
            registry.set_bounds(g).unwrap();
        }
        let date = |day| ImageDate::new(2024, day, Cadence::Daily).unwrap();
        assert_eq!(registry.generation_for(&date(149)).unwrap(), generation_key(2024, 1));
        assert_eq!(registry.generation_for(&date(150)).unwrap(), generation_key(2024, 150));
        assert_eq!(registry.generation_for(&date(300)).unwrap(), generation_key(2024, 150));

        let before = ImageDate::new(2023, 365, Cadence::Daily).unwrap();
        assert!(matches!(
            registry.generation_for(&before),
            Err(CwbError::MissingReference { .. })
        ));
        assert_eq!(registry.all_bounds().unwrap().len(), 2);
    }
}
