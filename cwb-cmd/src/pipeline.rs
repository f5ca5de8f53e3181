//! Commands that build the tile index and run aggregation.
//!
//! Pipeline work is blocking (SQLite, file reads, the rayon pool), so each
//! command moves it onto tokio's blocking thread pool.

use crate::context::{GlobalOpts, Pipeline};
use cwb_aggregate::AggregationRun;
use cwb_core::aggregation::ResultStore;
use cwb_core::cadence::{Cadence, GenerationKey};
use cwb_core::ObjectId;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Store the tile bounds of one generation from its reference raster.
pub async fn set_tile_bounds(opts: GlobalOpts, year: i32, day: u32) -> anyhow::Result<()> {
    blocking(move || {
        let generation = GenerationKey::new(year, day)?;
        let db = opts.open_database()?;
        let registry = cwb_aggregate::TileBoundsRegistry::new(db, opts.open_rasters()?);
        let bounds = registry.set_bounds(generation)?;
        println!("Stored bounds of {} tiles for generation {}", bounds.len(), generation);
        Ok(())
    })
    .await
}

/// Build the waterbody-to-tile index, or refresh one waterbody's entry.
pub async fn set_tiles(
    opts: GlobalOpts,
    year: i32,
    day: u32,
    objectid: Option<ObjectId>,
) -> anyhow::Result<()> {
    blocking(move || {
        let generation = GenerationKey::new(year, day)?;
        let pipeline = Pipeline::open(&opts)?;
        let index = pipeline.index();
        match objectid {
            Some(id) => {
                let tiles = index.rebuild_one(generation, id)?;
                let names: Vec<&str> = tiles.iter().map(|t| t.as_str()).collect();
                println!("Waterbody {} -> [{}]", id, names.join(", "));
            }
            None => {
                let report = index.build(generation, &pipeline.config)?;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Ok(())
    })
    .await
}

/// Aggregate every waterbody (or just one) for an image date.
pub async fn aggregate(
    opts: GlobalOpts,
    year: i32,
    day: u32,
    cadence: Cadence,
    objectid: Option<ObjectId>,
) -> anyhow::Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current slice");
            flag.store(true, Ordering::SeqCst);
        }
    });

    blocking(move || {
        let pipeline = Pipeline::open(&opts)?;
        let engine = pipeline.engine()?;

        if let Some(id) = objectid {
            let result = engine.aggregate_one(id, year, day, cadence)?;
            pipeline.db.save_results(std::slice::from_ref(&result))?;
            engine.ledger().clear(&result.unit())?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }

        let mut run = AggregationRun::new(&engine, &pipeline.db, year, day, cadence).with_cancel(cancel);
        for slice in run.by_ref() {
            match slice {
                Ok(slice) => info!(
                    "Persisted slice ending at {}: {} results, {} failures",
                    slice.cursor,
                    slice.results.len(),
                    slice.failures.len()
                ),
                Err(aborted) => {
                    error!("{}", aborted);
                    return Err(aborted.into());
                }
            }
        }
        if run.was_cancelled() {
            println!(
                "Cancelled at {}; {} waterbodies done",
                run.cursor(),
                run.cursor().position()
            );
        } else {
            println!("Aggregation complete: {} waterbodies", run.cursor().position());
        }
        Ok(())
    })
    .await
}

/// Retry pending ledger units of the selected cadences.
pub async fn retry(opts: GlobalOpts, cadences: Vec<Cadence>) -> anyhow::Result<()> {
    blocking(move || {
        let pipeline = Pipeline::open(&opts)?;
        let engine = pipeline.engine()?;
        let mut reports = Vec::with_capacity(cadences.len());
        for cadence in cadences {
            reports.push(engine.retry_failed(cadence, &pipeline.db)?);
        }
        let summary: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| {
                serde_json::json!({
                    "cadence": r.cadence,
                    "attempted": r.attempted,
                    "recovered": r.recovered.len(),
                    "still_failing": r.still_failing.len(),
                    "permanently_failed": r.permanently_failed,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok(())
    })
    .await
}

/// Print stored generations, index size and ledger counts.
pub async fn status(opts: GlobalOpts, cadence: Cadence) -> anyhow::Result<()> {
    blocking(move || {
        let db = opts.open_database()?;
        let ledger = cwb_aggregate::RetryLedger::new(db.clone(), opts.max_attempts);
        let summary = db.store_summary()?;
        let failed = ledger.permanently_failed(cadence)?;
        let status = serde_json::json!({
            "summary": summary,
            "permanently_failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwb_core::aggregation::{AggregationUnit, ResultQuery};
    use cwb_core::cadence::ImageDate;
    use cwb_core::FailureKind;
    use cwb_core::geometry::BoundingBox;
    use cwb_core::raster::{RasterDirectory, TileBounds, TileId, TileRaster};

    const WATERBODIES: &str = r#"{"type": "FeatureCollection", "features": [
        {"type": "Feature", "properties": {"OBJECTID": 1, "GNIS_NAME": "Clear Lake"},
         "geometry": {"type": "Polygon", "coordinates": [[[2,2],[5,2],[5,5],[2,5],[2,2]]]}},
        {"type": "Feature", "properties": {"OBJECTID": 2, "GNIS_NAME": "Border Reservoir"},
         "geometry": {"type": "Polygon", "coordinates": [[[8,2],[12,2],[12,5],[8,5],[8,2]]]}}
    ]}"#;

    fn tile(id: &str, min_x: f64, value: u8) -> TileRaster {
        let bounds = TileBounds::new(
            TileId::new(id),
            BoundingBox::new(min_x, 0.0, min_x + 10.0, 10.0),
            10,
            10,
        );
        TileRaster::filled(bounds, value)
    }

    #[tokio::test]
    async fn pipeline_commands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let rasters = dir.path().join("rasters");
        let store = RasterDirectory::new(&rasters);
        for day in [1, 200] {
            let date = ImageDate::new(2024, day, Cadence::Daily).unwrap();
            store.write_tile(&date, &tile("a", 0.0, 10)).unwrap();
            store.write_tile(&date, &tile("b", 10.0, 30)).unwrap();
        }
        let waterbodies = dir.path().join("waterbodies.geojson");
        std::fs::write(&waterbodies, WATERBODIES).unwrap();

        let opts = GlobalOpts {
            database: dir.path().join("cwb.sqlite"),
            waterbodies: Some(waterbodies),
            rasters: Some(rasters),
            workers: Some(2),
            slice_size: 1,
            max_attempts: 3,
            serial: false,
        };

        set_tile_bounds(opts.clone(), 2024, 1).await.unwrap();
        set_tiles(opts.clone(), 2024, 1, None).await.unwrap();
        aggregate(opts.clone(), 2024, 200, Cadence::Daily, None).await.unwrap();

        let db = opts.open_database().unwrap();
        assert_eq!(db.result_count(Cadence::Daily, 2024, 200).unwrap(), 2);
        let rows = db.query_results(&ResultQuery::new(2, Cadence::Daily)).unwrap();
        assert_eq!(rows[0].result.statistic.mean(), Some(20.0));

        retry(opts.clone(), Cadence::ALL.to_vec()).await.unwrap();
        status(opts.clone(), Cadence::Daily).await.unwrap();
        set_tiles(opts.clone(), 2024, 1, Some(2)).await.unwrap();

        // A stale failure of waterbody 1 is cleared once it aggregates.
        let unit = AggregationUnit::new(1, &ImageDate::new(2024, 200, Cadence::Daily).unwrap());
        db.ledger_record(&unit, FailureKind::ReadFailure, "unreadable tile a", 3)
            .unwrap();
        aggregate(opts.clone(), 2024, 200, Cadence::Daily, Some(1)).await.unwrap();
        assert!(db.ledger_get(&unit).unwrap().is_none());

        // No imagery for day 201.
        assert!(aggregate(opts.clone(), 2024, 201, Cadence::Daily, None).await.is_err());
        // No reference raster for day 2.
        assert!(set_tile_bounds(opts, 2024, 2).await.is_err());
    }
}
