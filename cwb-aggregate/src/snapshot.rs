//! Read-only copy of the tile index and tile bounds shared by workers.

use crate::tile_bounds::TileBoundsRegistry;
use crate::tile_index::TileIndex;
use cwb_core::cadence::{self, GenerationKey, ImageDate};
use cwb_core::raster::{TileBounds, TileId};
use cwb_core::{CwbError, ObjectId, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Tile assignments and every generation's bounds, loaded once before a run.
///
/// Aggregation never writes to it; after the index or bounds change a new
/// snapshot has to be captured and handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct TileSnapshot {
    assignments: HashMap<ObjectId, BTreeSet<TileId>>,
    bounds: BTreeMap<GenerationKey, HashMap<TileId, TileBounds>>,
}

impl TileSnapshot {
    pub fn capture(index: &TileIndex, registry: &TileBoundsRegistry) -> Result<Self> {
        let snapshot = Self::from_parts(index.all_assignments()?, registry.all_bounds()?);
        log::debug!(
            "Captured tile snapshot: {} assignments, {} generations",
            snapshot.assignments.len(),
            snapshot.bounds.len()
        );
        Ok(snapshot)
    }

    pub fn from_parts(
        assignments: BTreeMap<ObjectId, BTreeSet<TileId>>,
        bounds: BTreeMap<GenerationKey, Vec<TileBounds>>,
    ) -> Self {
        Self {
            assignments: assignments.into_iter().collect(),
            bounds: bounds
                .into_iter()
                .map(|(generation, tiles)| {
                    let by_id = tiles.into_iter().map(|t| (t.tile_id.clone(), t)).collect();
                    (generation, by_id)
                })
                .collect(),
        }
    }

    /// Tiles of one waterbody; `None` when it is absent from the index.
    pub fn assignments_for(&self, objectid: ObjectId) -> Option<&BTreeSet<TileId>> {
        self.assignments.get(&objectid)
    }

    pub fn generation_for(&self, date: &ImageDate) -> Result<GenerationKey> {
        cadence::generation_for(self.bounds.keys(), date).ok_or(CwbError::MissingReference {
            year: date.year,
            day: date.day,
        })
    }

    pub fn bounds_of(&self, generation: GenerationKey, tile: &TileId) -> Result<&TileBounds> {
        self.bounds
            .get(&generation)
            .and_then(|tiles| tiles.get(tile))
            .ok_or_else(|| {
                CwbError::NotFound(format!("tile {} has no bounds in generation {}", tile, generation))
            })
    }

    pub fn generations(&self) -> Vec<GenerationKey> {
        self.bounds.keys().copied().collect()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwb_core::cadence::Cadence;
    use cwb_core::geometry::BoundingBox;

    fn tile(id: &str) -> TileBounds {
        TileBounds::new(TileId::new(id), BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10)
    }

    #[test]
    fn lookups() {
        let g1 = GenerationKey::new(2024, 1).unwrap();
        let g2 = GenerationKey::new(2024, 150).unwrap();
        let snapshot = TileSnapshot::from_parts(
            BTreeMap::from([(1, BTreeSet::from([TileId::new("a")]))]),
            BTreeMap::from([(g1, vec![tile("a"), tile("b")]), (g2, vec![tile("a")])]),
        );

        assert_eq!(snapshot.assignments_for(1).unwrap().len(), 1);
        assert!(snapshot.assignments_for(2).is_none());

        let date = ImageDate::new(2024, 200, Cadence::Weekly).unwrap();
        assert_eq!(snapshot.generation_for(&date).unwrap(), g2);
        assert!(snapshot.bounds_of(g1, &TileId::new("b")).is_ok());
        assert!(matches!(
            snapshot.bounds_of(g2, &TileId::new("b")),
            Err(CwbError::NotFound(_))
        ));
        assert_eq!(snapshot.generations(), vec![g1, g2]);
    }

    #[test]
    fn empty_snapshot_has_no_generation() {
        let date = ImageDate::new(2024, 1, Cadence::Daily).unwrap();
        assert!(matches!(
            TileSnapshot::default().generation_for(&date),
            Err(CwbError::MissingReference { year: 2024, day: 1 })
        ));
    }
}
