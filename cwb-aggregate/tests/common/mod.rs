#![allow(dead_code)]

use cwb_aggregate::{
    AggregationEngine, PipelineConfig, RetryLedger, TileBoundsRegistry, TileIndex, TileSnapshot,
};
use cwb_core::cadence::{Cadence, GenerationKey, ImageDate};
use cwb_core::geometry::BoundingBox;
use cwb_core::raster::{MemoryRaster, TileBounds, TileId, TileRaster};
use cwb_core::waterbody::{Waterbody, WaterbodyInventory};
use cwb_db::Database;
use geo::{polygon, MultiPolygon};
use std::sync::Arc;

pub const TILE_A_VALUE: u8 = 10;
pub const TILE_B_VALUE: u8 = 30;

pub fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
    ]])
}

/// A 10x10 pixel tile covering `[min_x, min_x + 10] x [0, 10]`.
pub fn tile(id: &str, min_x: f64, value: u8) -> TileRaster {
    let bounds = TileBounds::new(
        TileId::new(id),
        BoundingBox::new(min_x, 0.0, min_x + 10.0, 10.0),
        10,
        10,
    );
    TileRaster::filled(bounds, value)
}

pub fn generation_key(year: i32, day: u32) -> GenerationKey {
    GenerationKey::new(year, day).unwrap()
}

pub fn daily(year: i32, day: u32) -> ImageDate {
    ImageDate::new(year, day, Cadence::Daily).unwrap()
}

/// Waterbody 1 lies inside tile `a`; waterbody 2 straddles `a` and `b`.
pub fn lakes() -> Vec<Waterbody> {
    vec![
        Waterbody::new(1, "Clear Lake", square(2.0, 2.0, 5.0, 5.0)),
        Waterbody::new(2, "Border Reservoir", square(8.0, 2.0, 12.0, 5.0)),
    ]
}

/// `n` small lakes alternating between tile `a` and tile `b`.
pub fn many_lakes(n: i64) -> Vec<Waterbody> {
    (1..=n)
        .map(|id| {
            let base = if id % 2 == 0 { 1.0 } else { 11.0 };
            let x = base + (id % 4) as f64;
            Waterbody::new(id * 10, format!("Lake {}", id), square(x, 1.0, x + 2.0, 3.0))
        })
        .collect()
}

pub struct Fixture {
    pub db: Database,
    pub raster: Arc<MemoryRaster>,
    pub inventory: Arc<WaterbodyInventory>,
    pub registry: TileBoundsRegistry,
    pub index: TileIndex,
}

impl Fixture {
    /// Empty imagery and store over `waterbodies`.
    pub fn new(waterbodies: Vec<Waterbody>) -> Self {
        let db = Database::new().unwrap();
        let raster = Arc::new(MemoryRaster::new());
        let inventory = Arc::new(WaterbodyInventory::new(waterbodies).unwrap());
        Self {
            registry: TileBoundsRegistry::new(db.clone(), raster.clone()),
            index: TileIndex::new(db.clone(), inventory.clone()),
            db,
            raster,
            inventory,
        }
    }

    /// Tiles `a` and `b` as the 2024-001 reference and as 2024-200 daily
    /// imagery, with the index built from the reference.
    pub fn two_tiles(waterbodies: Vec<Waterbody>) -> Self {
        let fixture = Self::new(waterbodies);
        fixture.add_tiles(generation_key(2024, 1).reference_date(), &["a", "b"]);
        fixture.add_tiles(daily(2024, 200), &["a", "b"]);
        fixture.registry.set_bounds(generation_key(2024, 1)).unwrap();
        fixture
            .index
            .build(generation_key(2024, 1), &PipelineConfig::default())
            .unwrap();
        fixture
    }

    pub fn add_tiles(&self, date: ImageDate, ids: &[&str]) {
        for id in ids {
            let raster = match *id {
                "a" => tile("a", 0.0, TILE_A_VALUE),
                "b" => tile("b", 10.0, TILE_B_VALUE),
                other => panic!("unknown fixture tile {}", other),
            };
            self.raster.insert_tile(date, raster);
        }
    }

    pub fn snapshot(&self) -> Arc<TileSnapshot> {
        Arc::new(TileSnapshot::capture(&self.index, &self.registry).unwrap())
    }

    pub fn ledger(&self, max_attempts: u32) -> RetryLedger {
        RetryLedger::new(self.db.clone(), max_attempts)
    }

    pub fn engine(&self, config: PipelineConfig) -> AggregationEngine {
        AggregationEngine::new(
            self.inventory.clone(),
            self.raster.clone(),
            self.ledger(config.max_attempts),
            self.snapshot(),
            config,
        )
        .unwrap()
    }
}
