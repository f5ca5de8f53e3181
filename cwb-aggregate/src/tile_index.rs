//! Waterbody-to-tile index.
//!
//! Each waterbody is assigned the tiles its polygon overlaps, computed once
//! from the bounds of one generation. The assignment is reused for every
//! image date; only the per-tile georeferencing changes between generations.

use crate::config::PipelineConfig;
use cwb_core::cadence::GenerationKey;
use cwb_core::raster::{TileBounds, TileId};
use cwb_core::waterbody::{Waterbody, WaterbodySource};
use cwb_core::{CwbError, ObjectId, Result};
use cwb_db::Database;
use geo::Intersects;
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Tiles whose footprint overlaps the waterbody polygon.
///
/// Footprints are screened by bounding box before the exact polygon test.
/// A waterbody without usable geometry overlaps nothing.
pub fn assign_tiles(waterbody: &Waterbody, tiles: &[TileBounds]) -> BTreeSet<TileId> {
    let Some(footprint) = waterbody.bbox() else {
        return BTreeSet::new();
    };
    tiles
        .iter()
        .filter(|t| t.bounds.intersects(&footprint))
        .filter(|t| waterbody.geometry.intersects(&t.bounds.to_rect()))
        .map(|t| t.tile_id.clone())
        .collect()
}

/// Outcome of an index build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexReport {
    pub generation: GenerationKey,
    pub waterbodies: usize,
    /// Waterbodies that overlap no tile.
    pub unassigned: usize,
    /// Total waterbody-tile pairs.
    pub links: usize,
}

impl IndexReport {
    fn of(generation: GenerationKey, assignments: &BTreeMap<ObjectId, BTreeSet<TileId>>) -> Self {
        Self {
            generation,
            waterbodies: assignments.len(),
            unassigned: assignments.values().filter(|t| t.is_empty()).count(),
            links: assignments.values().map(|t| t.len()).sum(),
        }
    }
}

pub struct TileIndex {
    db: Database,
    inventory: Arc<dyn WaterbodySource>,
}

impl TileIndex {
    pub fn new(db: Database, inventory: Arc<dyn WaterbodySource>) -> Self {
        Self { db, inventory }
    }

    /// Rebuild the assignment of every waterbody from `generation`'s bounds.
    ///
    /// Replaces the whole stored index. Serial and parallel builds store the
    /// same assignments.
    pub fn build(&self, generation: GenerationKey, config: &PipelineConfig) -> Result<IndexReport> {
        let tiles = self.generation_tiles(generation)?;
        let waterbodies = self.inventory.list_waterbodies()?;
        info!(
            "Building tile index for {} waterbodies over {} tiles of {}",
            waterbodies.len(),
            tiles.len(),
            generation
        );

        let assign = |wb: &Waterbody| (wb.objectid, assign_tiles(wb, &tiles));
        let assignments: BTreeMap<ObjectId, BTreeSet<TileId>> = match config.build_pool()? {
            Some(pool) => pool.install(|| waterbodies.par_iter().map(assign).collect()),
            None => waterbodies.iter().map(assign).collect(),
        };

        self.db.store_tile_assignments(generation, &assignments, true)?;
        let report = IndexReport::of(generation, &assignments);
        info!(
            "Tile index built: {} waterbodies, {} links, {} outside every tile",
            report.waterbodies, report.links, report.unassigned
        );
        Ok(report)
    }

    /// Recompute the assignment of a single waterbody, leaving the rest.
    pub fn rebuild_one(&self, generation: GenerationKey, objectid: ObjectId) -> Result<BTreeSet<TileId>> {
        let tiles = self.generation_tiles(generation)?;
        let waterbody = self
            .inventory
            .get(objectid)?
            .ok_or_else(|| CwbError::NotFound(format!("waterbody {}", objectid)))?;
        let assigned = assign_tiles(&waterbody, &tiles);
        debug!("Waterbody {} assigned to {} tiles", objectid, assigned.len());

        let single = BTreeMap::from([(objectid, assigned.clone())]);
        self.db.store_tile_assignments(generation, &single, false)?;
        Ok(assigned)
    }

    /// Stored tiles of one waterbody; empty when it overlaps none or was
    /// never indexed.
    pub fn assignments_for(&self, objectid: ObjectId) -> Result<BTreeSet<TileId>> {
        Ok(self.db.tile_assignment(objectid)?.unwrap_or_default())
    }

    /// Stored tiles of each requested waterbody. Every id in `objectids` is
    /// a key of the result, mapped to an empty set when it has no tiles.
    pub fn assignments_for_all(
        &self,
        objectids: &BTreeSet<ObjectId>,
    ) -> Result<BTreeMap<ObjectId, BTreeSet<TileId>>> {
        let mut stored = self.db.all_tile_assignments()?;
        Ok(objectids
            .iter()
            .map(|id| (*id, stored.remove(id).unwrap_or_default()))
            .collect())
    }

    /// The whole stored index.
    pub fn all_assignments(&self) -> Result<BTreeMap<ObjectId, BTreeSet<TileId>>> {
        Ok(self.db.all_tile_assignments()?)
    }

    fn generation_tiles(&self, generation: GenerationKey) -> Result<Vec<TileBounds>> {
        let tiles = self.db.generation_bounds(generation)?;
        if tiles.is_empty() {
            return Err(CwbError::MissingReference {
                year: generation.year,
                day: generation.day,
            });
        }
        Ok(tiles)
    }
}
