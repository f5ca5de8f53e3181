//! Tile bounds per generation and the waterbody-to-tile index.

use crate::Database;
use cwb_core::cadence::GenerationKey;
use cwb_core::geometry::BoundingBox;
use cwb_core::raster::{TileBounds, TileId};
use cwb_core::ObjectId;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};

fn bounds_from_row(row: &Row<'_>) -> rusqlite::Result<TileBounds> {
    Ok(TileBounds {
        tile_id: TileId::new(row.get::<_, String>(0)?),
        bounds: BoundingBox::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
        width: row.get(5)?,
        height: row.get(6)?,
        res_x: row.get(7)?,
        res_y: row.get(8)?,
        crs: row.get(9)?,
    })
}

const BOUNDS_COLUMNS: &str = "tile_id, min_x, min_y, max_x, max_y, width, height, res_x, res_y, crs";

impl Database {
    // ───────────────────── Tile bounds ─────────────────────

    /// Replace every bounds record of `generation` with `bounds`.
    ///
    /// Runs in one transaction, so calling it twice with the same input
    /// leaves exactly the same rows.
    pub fn replace_tile_bounds(
        &self,
        generation: GenerationKey,
        bounds: &[TileBounds],
    ) -> anyhow::Result<()> {
        self.transaction(|tx| {
            tx.execute(
                "DELETE FROM tile_bounds WHERE gen_year = ?1 AND gen_day = ?2",
                params![generation.year, generation.day],
            )?;
            let mut stmt = tx.prepare(
                "INSERT INTO tile_bounds
                 (gen_year, gen_day, tile_id, min_x, min_y, max_x, max_y, width, height, res_x, res_y, crs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for b in bounds {
                stmt.execute(params![
                    generation.year,
                    generation.day,
                    b.tile_id.as_str(),
                    b.bounds.min_x,
                    b.bounds.min_y,
                    b.bounds.max_x,
                    b.bounds.max_y,
                    b.width,
                    b.height,
                    b.res_x,
                    b.res_y,
                    b.crs,
                ])?;
            }
            Ok(())
        })?;
        log::info!(
            "[CWB] tiles: stored {} tile bounds for generation {}",
            bounds.len(),
            generation
        );
        Ok(())
    }

    /// Bounds of one tile in one generation.
    pub fn tile_bounds(
        &self,
        generation: GenerationKey,
        tile: &TileId,
    ) -> anyhow::Result<Option<TileBounds>> {
        let conn = self.conn.lock();
        let bounds = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tile_bounds
                     WHERE gen_year = ?1 AND gen_day = ?2 AND tile_id = ?3",
                    BOUNDS_COLUMNS
                ),
                params![generation.year, generation.day, tile.as_str()],
                bounds_from_row,
            )
            .optional()?;
        Ok(bounds)
    }

    /// Every tile bounds record of one generation, ordered by tile id.
    pub fn generation_bounds(&self, generation: GenerationKey) -> anyhow::Result<Vec<TileBounds>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tile_bounds
             WHERE gen_year = ?1 AND gen_day = ?2
             ORDER BY tile_id",
            BOUNDS_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![generation.year, generation.day], bounds_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Generations that have at least one bounds record, oldest first.
    pub fn generations(&self) -> anyhow::Result<Vec<GenerationKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT gen_year, gen_day FROM tile_bounds
             ORDER BY gen_year, gen_day",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(GenerationKey {
                    year: row.get(0)?,
                    day: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ───────────────────── Tile assignments ─────────────────────

    /// Store tile assignments built from `generation`.
    ///
    /// With `replace_all` every existing assignment is dropped first (a full
    /// rebuild); otherwise only the given waterbodies are overwritten.
    pub fn store_tile_assignments(
        &self,
        generation: GenerationKey,
        assignments: &BTreeMap<ObjectId, BTreeSet<TileId>>,
        replace_all: bool,
    ) -> anyhow::Result<()> {
        self.transaction(|tx| {
            if replace_all {
                tx.execute("DELETE FROM tile_assignments", [])?;
            }
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO tile_assignments (objectid, gen_year, gen_day, tiles)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (objectid, tiles) in assignments {
                let tiles_json = serde_json::to_string(tiles)?;
                stmt.execute(params![objectid, generation.year, generation.day, tiles_json])?;
            }
            Ok(())
        })?;
        log::info!(
            "[CWB] tiles: stored {} tile assignments from generation {}",
            assignments.len(),
            generation
        );
        Ok(())
    }

    /// Tiles assigned to one waterbody; `None` when it was never indexed.
    pub fn tile_assignment(&self, objectid: ObjectId) -> anyhow::Result<Option<BTreeSet<TileId>>> {
        let conn = self.conn.lock();
        let tiles: Option<String> = conn
            .query_row(
                "SELECT tiles FROM tile_assignments WHERE objectid = ?1",
                params![objectid],
                |row| row.get(0),
            )
            .optional()?;
        tiles
            .map(|t| serde_json::from_str(&t).map_err(anyhow::Error::from))
            .transpose()
    }

    /// Every stored assignment.
    pub fn all_tile_assignments(&self) -> anyhow::Result<BTreeMap<ObjectId, BTreeSet<TileId>>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT objectid, tiles FROM tile_assignments ORDER BY objectid")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, ObjectId>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut map = BTreeMap::new();
        for (objectid, tiles) in rows {
            map.insert(objectid, serde_json::from_str(&tiles)?);
        }
        Ok(map)
    }

    pub fn assignment_count(&self) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tile_assignments", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
