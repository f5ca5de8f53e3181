//! Command implementations for CWB CLI.
//!
//! Provides subcommands for preparing the tile index, running and retrying
//! aggregation, and reading back stored results and waterbody attributes.

use clap::Subcommand;
use cwb_core::cadence::Cadence;
use cwb_core::ObjectId;

pub mod context;
pub mod pipeline;
pub mod query;

pub use context::{DateArgs, GlobalOpts};
use query::{DataRange, OutputFormat};

#[derive(Subcommand)]
pub enum Command {
    /// Read tile bounds from the reference raster of a generation
    SetTileBounds {
        /// Generation year
        #[arg(long)]
        year: i32,

        /// Generation day of year
        #[arg(long)]
        day: u32,
    },

    /// Assign waterbodies to the tiles of a generation
    SetTiles {
        /// Generation year
        #[arg(long)]
        year: i32,

        /// Generation day of year
        #[arg(long)]
        day: u32,

        /// Only refresh this waterbody
        #[arg(long)]
        objectid: Option<ObjectId>,
    },

    /// Aggregate imagery of one date for every waterbody
    Aggregate {
        #[command(flatten)]
        date: DateArgs,

        /// Use weekly instead of daily imagery
        #[arg(long)]
        weekly: bool,

        /// Only aggregate this waterbody
        #[arg(long)]
        objectid: Option<ObjectId>,
    },

    /// Retry units recorded in the retry ledgers
    Retry {
        /// Only retry the daily ledger
        #[arg(long, conflicts_with = "weekly_only")]
        daily_only: bool,

        /// Only retry the weekly ledger
        #[arg(long)]
        weekly_only: bool,
    },

    /// Print stored results of one waterbody
    GetData {
        #[arg(long)]
        objectid: ObjectId,

        /// Read weekly instead of daily results
        #[arg(long)]
        weekly: bool,

        #[arg(long)]
        start_year: Option<i32>,

        /// Defaults to the first day of --start-year
        #[arg(long, requires = "start_year")]
        start_day: Option<u32>,

        #[arg(long)]
        end_year: Option<i32>,

        /// Defaults to the last day of --end-year
        #[arg(long, requires = "end_year")]
        end_day: Option<u32>,

        /// Pixel value ranges to count, as JSON: [[0,99],[100,253]]
        #[arg(long)]
        ranges: Option<String>,

        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Find waterbodies by name or by location
    Search {
        /// Case-insensitive name substring
        #[arg(long, conflicts_with_all = ["lat", "lng"])]
        name: Option<String>,

        #[arg(long, requires = "lng", allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lng: Option<f64>,
    },

    /// Print the attributes of one waterbody
    Properties {
        #[arg(long)]
        objectid: ObjectId,
    },

    /// Print the polygon of one waterbody as GeoJSON
    Geometry {
        #[arg(long)]
        objectid: ObjectId,
    },

    /// Show generations, index size and retry ledger counts
    Status {
        /// List permanently failed weekly units instead of daily ones
        #[arg(long)]
        weekly: bool,
    },
}

pub async fn run(opts: GlobalOpts, command: Command) -> anyhow::Result<()> {
    match command {
        Command::SetTileBounds { year, day } => pipeline::set_tile_bounds(opts, year, day).await,
        Command::SetTiles {
            year,
            day,
            objectid,
        } => pipeline::set_tiles(opts, year, day, objectid).await,
        Command::Aggregate {
            date,
            weekly,
            objectid,
        } => {
            let (year, day) = date.year_day()?;
            let cadence = Cadence::from_daily_flag(!weekly);
            pipeline::aggregate(opts, year, day, cadence, objectid).await
        }
        Command::Retry {
            daily_only,
            weekly_only,
        } => {
            let cadences = match (daily_only, weekly_only) {
                (true, _) => vec![Cadence::Daily],
                (_, true) => vec![Cadence::Weekly],
                _ => Cadence::ALL.to_vec(),
            };
            pipeline::retry(opts, cadences).await
        }
        Command::GetData {
            objectid,
            weekly,
            start_year,
            start_day,
            end_year,
            end_day,
            ranges,
            format,
        } => {
            let range = DataRange {
                start_year,
                start_day,
                end_year,
                end_day,
            };
            query::get_data(
                &opts,
                objectid,
                Cadence::from_daily_flag(!weekly),
                &range,
                ranges.as_deref(),
                format,
            )
        }
        Command::Search { name, lat, lng } => query::search(&opts, name.as_deref(), lat, lng),
        Command::Properties { objectid } => query::properties(&opts, objectid),
        Command::Geometry { objectid } => query::geometry(&opts, objectid),
        Command::Status { weekly } => {
            pipeline::status(opts, Cadence::from_daily_flag(!weekly)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        global: GlobalOpts,
        #[command(subcommand)]
        command: Command,
    }

    #[test]
    fn parses_aggregate() {
        let cli = TestCli::parse_from([
            "cwb", "--slice-size", "25", "aggregate", "--year", "2024", "--day", "200", "--weekly",
        ]);
        assert_eq!(cli.global.slice_size, 25);
        match cli.command {
            Command::Aggregate { date, weekly, objectid } => {
                assert_eq!(date.year_day().unwrap(), (2024, 200));
                assert!(weekly);
                assert_eq!(objectid, None);
            }
            _ => panic!("expected aggregate"),
        }
    }

    #[test]
    fn retry_flags_conflict() {
        assert!(TestCli::try_parse_from(["cwb", "retry", "--daily-only", "--weekly-only"]).is_err());
    }

    #[test]
    fn search_by_point_accepts_negative_coordinates() {
        let cli = TestCli::parse_from(["cwb", "search", "--lat", "38.9", "--lng", "-120.0"]);
        match cli.command {
            Command::Search { name, lat, lng } => {
                assert!(name.is_none());
                assert_eq!((lat, lng), (Some(38.9), Some(-120.0)));
            }
            _ => panic!("expected search"),
        }
    }
}
