//! Global options and the collaborators they open.

use anyhow::Context as _;
use chrono::NaiveDate;
use clap::Args;
use cwb_aggregate::{
    AggregationEngine, ExecutionMode, PipelineConfig, TileBoundsRegistry, TileIndex, TileSnapshot,
};
use cwb_aggregate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_SLICE_SIZE};
use cwb_core::raster::RasterDirectory;
use cwb_core::waterbody::WaterbodyInventory;
use cwb_db::Database;
use cwb_utils::dates;
use std::path::PathBuf;
use std::sync::Arc;

/// Options shared by every subcommand. Each can also be set from the
/// environment.
#[derive(Debug, Clone, Args)]
pub struct GlobalOpts {
    /// SQLite database holding tile bounds, the tile index, ledgers and results
    #[arg(long, env = "CWB_DATABASE", default_value = "cwb.sqlite", global = true)]
    pub database: PathBuf,

    /// GeoJSON FeatureCollection of waterbody polygons
    #[arg(long, env = "CWB_WATERBODIES", global = true)]
    pub waterbodies: Option<PathBuf>,

    /// Root directory of the raster tiles
    #[arg(long, env = "CWB_RASTERS", global = true)]
    pub rasters: Option<PathBuf>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long, env = "CWB_WORKERS", global = true)]
    pub workers: Option<usize>,

    /// Waterbodies per slice
    #[arg(long, env = "CWB_SLICE_SIZE", default_value_t = DEFAULT_SLICE_SIZE, global = true)]
    pub slice_size: usize,

    /// Failed attempts before a unit is marked permanently failed
    #[arg(long, env = "CWB_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS, global = true)]
    pub max_attempts: u32,

    /// Process waterbodies one at a time instead of on the worker pool
    #[arg(long, global = true)]
    pub serial: bool,
}

impl GlobalOpts {
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::default()
            .with_slice_size(self.slice_size)
            .with_max_attempts(self.max_attempts);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.serial {
            config = config.with_mode(ExecutionMode::Serial);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn open_database(&self) -> anyhow::Result<Database> {
        Database::open(&self.database)
            .with_context(|| format!("Failed to open database {}", self.database.display()))
    }

    pub fn open_inventory(&self) -> anyhow::Result<Arc<WaterbodyInventory>> {
        let path = self
            .waterbodies
            .as_ref()
            .context("--waterbodies (or CWB_WATERBODIES) is required for this command")?;
        Ok(Arc::new(WaterbodyInventory::open(path)?))
    }

    pub fn open_rasters(&self) -> anyhow::Result<Arc<RasterDirectory>> {
        let root = self
            .rasters
            .as_ref()
            .context("--rasters (or CWB_RASTERS) is required for this command")?;
        if !root.is_dir() {
            anyhow::bail!("Raster directory {} does not exist", root.display());
        }
        Ok(Arc::new(RasterDirectory::new(root)))
    }
}

/// An image date given either as `--year/--day` or as `--date`.
#[derive(Debug, Clone, Args)]
pub struct DateArgs {
    /// Image year
    #[arg(long, requires = "day", conflicts_with = "date")]
    pub year: Option<i32>,

    /// Day of year (1-366)
    #[arg(long, requires = "year")]
    pub day: Option<u32>,

    /// Calendar date, e.g. 2024-07-18
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

impl DateArgs {
    pub fn year_day(&self) -> anyhow::Result<(i32, u32)> {
        match (self.year, self.day, self.date) {
            (Some(year), Some(day), None) => {
                dates::date_from_year_day(year, day)?;
                Ok((year, day))
            }
            (None, None, Some(date)) => Ok(dates::year_day(&date)),
            _ => anyhow::bail!("Give either --year and --day, or --date"),
        }
    }
}

/// Everything the pipeline commands need, opened from [`GlobalOpts`].
pub struct Pipeline {
    pub db: Database,
    pub inventory: Arc<WaterbodyInventory>,
    pub rasters: Arc<RasterDirectory>,
    pub config: PipelineConfig,
}

impl Pipeline {
    pub fn open(opts: &GlobalOpts) -> anyhow::Result<Self> {
        Ok(Self {
            db: opts.open_database()?,
            inventory: opts.open_inventory()?,
            rasters: opts.open_rasters()?,
            config: opts.pipeline_config()?,
        })
    }

    pub fn registry(&self) -> TileBoundsRegistry {
        TileBoundsRegistry::new(self.db.clone(), self.rasters.clone())
    }

    pub fn index(&self) -> TileIndex {
        TileIndex::new(self.db.clone(), self.inventory.clone())
    }

    pub fn engine(&self) -> anyhow::Result<AggregationEngine> {
        let snapshot = TileSnapshot::capture(&self.index(), &self.registry())?;
        if snapshot.assignment_count() == 0 {
            log::warn!("The tile index is empty; run set-tiles before aggregating");
        }
        Ok(AggregationEngine::new(
            self.inventory.clone(),
            self.rasters.clone(),
            cwb_aggregate::RetryLedger::new(self.db.clone(), self.config.max_attempts),
            Arc::new(snapshot),
            self.config.clone(),
        )?)
    }
}
