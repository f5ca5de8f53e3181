//! Read-only commands: stored results and waterbody lookups.

use crate::context::GlobalOpts;
use clap::ValueEnum;
use cwb_core::aggregation::{QueriedResult, ResultQuery, ResultStore, ValueRange};
use cwb_core::cadence::Cadence;
use cwb_core::geometry::to_geojson;
use cwb_core::waterbody::WaterbodySource;
use cwb_core::ObjectId;
use cwb_utils::dates;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

/// Range filter of the `get-data` command.
#[derive(Debug, Clone, Default)]
pub struct DataRange {
    pub start_year: Option<i32>,
    pub start_day: Option<u32>,
    pub end_year: Option<i32>,
    pub end_day: Option<u32>,
}

/// Parse value ranges given as a JSON list of `[min, max]` pairs.
pub fn parse_ranges(json: &str) -> anyhow::Result<Vec<ValueRange>> {
    let pairs: Vec<(u8, u8)> = serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Ranges must look like [[0,99],[100,253]]: {}", e))?;
    pairs
        .into_iter()
        .map(|(min, max)| ValueRange::new(min, max).map_err(anyhow::Error::from))
        .collect()
}

fn build_query(
    objectid: ObjectId,
    cadence: Cadence,
    range: &DataRange,
    ranges: Option<Vec<ValueRange>>,
) -> ResultQuery {
    let mut query = ResultQuery::new(objectid, cadence);
    if let Some(year) = range.start_year {
        query = query.starting(year, range.start_day);
    }
    if let Some(year) = range.end_year {
        query = query.ending(year, range.end_day);
    }
    if let Some(ranges) = ranges {
        query = query.with_ranges(ranges);
    }
    query
}

/// Write rows as CSV with one column per requested value range.
pub fn write_csv<W: Write>(out: W, rows: &[QueriedResult], range_count: usize) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header: Vec<String> = [
        "objectid",
        "cadence",
        "year",
        "day",
        "date",
        "valid_pixels",
        "land_pixels",
        "no_data_pixels",
        "mean",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    header.extend((0..range_count).map(|i| format!("range_{}", i)));
    writer.write_record(&header)?;

    for row in rows {
        let r = &row.result;
        let histogram = r.statistic.histogram();
        let mut record = vec![
            r.objectid.to_string(),
            r.cadence.to_string(),
            r.year.to_string(),
            r.day.to_string(),
            dates::date_from_year_day(r.year, r.day)?.to_string(),
            histogram.map_or(0, |h| h.valid_count()).to_string(),
            histogram.map_or(0, |h| h.land_count()).to_string(),
            histogram.map_or(0, |h| h.no_data_count()).to_string(),
            r.statistic.mean().map(|m| format!("{:.3}", m)).unwrap_or_default(),
        ];
        record.extend(row.range_counts.iter().map(|c| c.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn get_data(
    opts: &GlobalOpts,
    objectid: ObjectId,
    cadence: Cadence,
    range: &DataRange,
    ranges: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ranges = ranges.map(parse_ranges).transpose()?;
    let range_count = ranges.as_ref().map_or(0, |r| r.len());
    let db = opts.open_database()?;
    let rows = db.query_results(&build_query(objectid, cadence, range, ranges))?;
    log::info!("Found {} {} results for waterbody {}", rows.len(), cadence, objectid);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Csv => write_csv(std::io::stdout().lock(), &rows, range_count)?,
    }
    Ok(())
}

pub fn search(
    opts: &GlobalOpts,
    name: Option<&str>,
    lat: Option<f64>,
    lng: Option<f64>,
) -> anyhow::Result<()> {
    let inventory = opts.open_inventory()?;
    match (name, lat, lng) {
        (Some(name), _, _) => {
            let hits = inventory.find_by_name(name)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        (None, Some(lat), Some(lng)) => match inventory.find_by_point(lng, lat)? {
            Some(hit) => println!("{}", serde_json::to_string_pretty(&hit)?),
            None => anyhow::bail!("No waterbody contains ({}, {})", lat, lng),
        },
        _ => anyhow::bail!("Give either --name, or both --lat and --lng"),
    }
    Ok(())
}

pub fn properties(opts: &GlobalOpts, objectid: ObjectId) -> anyhow::Result<()> {
    let inventory = opts.open_inventory()?;
    let Some(props) = inventory.properties_of(objectid)? else {
        anyhow::bail!("No waterbody with OBJECTID {}", objectid);
    };
    println!("{}", serde_json::to_string_pretty(&props)?);
    Ok(())
}

pub fn geometry(opts: &GlobalOpts, objectid: ObjectId) -> anyhow::Result<()> {
    let inventory = opts.open_inventory()?;
    let Some(waterbody) = inventory.get(objectid)? else {
        anyhow::bail!("No waterbody with OBJECTID {}", objectid);
    };
    let body = serde_json::json!({
        "objectid": waterbody.objectid,
        "name": waterbody.name,
        "crs": waterbody.crs,
        "geometry": to_geojson(&waterbody.geometry),
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwb_core::aggregation::{AggregationResult, AggregationUnit, PixelHistogram, Statistic};
    use cwb_core::cadence::ImageDate;

    fn row(values: &[u8], ranges: Option<&[ValueRange]>) -> QueriedResult {
        let date = ImageDate::new(2024, 200, Cadence::Daily).unwrap();
        let mut h = PixelHistogram::new();
        for v in values {
            h.add(*v);
        }
        let result = AggregationResult::new(AggregationUnit::new(5, &date), Statistic::from_histogram(h));
        QueriedResult::new(result, ranges)
    }

    #[test]
    fn ranges_parse_from_json_pairs() {
        let ranges = parse_ranges("[[0, 99], [100, 253]]").unwrap();
        assert_eq!(ranges.len(), 2);
        assert!(parse_ranges("[[200, 100]]").is_err());
        assert!(parse_ranges("[[0, 300]]").is_err());
        assert!(parse_ranges("nope").is_err());
    }

    #[test]
    fn csv_has_one_column_per_range() {
        let ranges = parse_ranges("[[0, 99], [100, 253]]").unwrap();
        let rows = vec![row(&[10, 20, 150, 254], Some(&ranges)), row(&[], Some(&ranges))];
        let mut out = Vec::new();
        write_csv(&mut out, &rows, ranges.len()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "objectid,cadence,year,day,date,valid_pixels,land_pixels,no_data_pixels,mean,range_0,range_1"
        );
        assert_eq!(lines[1], "5,daily,2024,200,2024-07-18,3,1,0,60.000,2,1");
        assert_eq!(lines[2], "5,daily,2024,200,2024-07-18,0,0,0,,0,0");
    }

    #[test]
    fn query_defaults_missing_days() {
        let range = DataRange {
            start_year: Some(2023),
            end_year: Some(2024),
            end_day: Some(10),
            ..DataRange::default()
        };
        let q = build_query(1, Cadence::Weekly, &range, None);
        assert_eq!(q.ordinal_bounds(), (2023001, 2024010));
    }

    fn opts_for(dir: &std::path::Path, waterbodies: Option<std::path::PathBuf>) -> GlobalOpts {
        GlobalOpts {
            database: dir.join("cwb.sqlite"),
            waterbodies,
            rasters: None,
            workers: None,
            slice_size: 100,
            max_attempts: 3,
            serial: false,
        }
    }

    #[test]
    fn lookups_read_the_geojson_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waterbodies.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [{
                "type": "Feature",
                "properties": {"OBJECTID": 7, "GNIS_NAME": "Lake Tahoe"},
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[4,0],[4,4],[0,4],[0,0]]]}
            }]}"#,
        )
        .unwrap();
        let opts = opts_for(dir.path(), Some(path));

        assert!(properties(&opts, 7).is_ok());
        assert!(properties(&opts, 8).is_err());
        assert!(geometry(&opts, 7).is_ok());
        assert!(search(&opts, Some("'tahoe'"), None, None).is_ok());
        assert!(search(&opts, None, Some(2.0), Some(2.0)).is_ok());
        assert!(search(&opts, None, Some(20.0), Some(20.0)).is_err());
        assert!(search(&opts, None, None, None).is_err());
    }

    #[test]
    fn get_data_reads_the_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let opts = opts_for(dir.path(), None);
        opts.open_database()
            .unwrap()
            .save_results(&[row(&[10], None).result])
            .unwrap();

        let all = DataRange::default();
        assert!(get_data(&opts, 5, Cadence::Daily, &all, Some("[[0,99]]"), OutputFormat::Csv).is_ok());
        assert!(get_data(&opts, 5, Cadence::Daily, &all, None, OutputFormat::Json).is_ok());
        assert!(get_data(&opts, 5, Cadence::Daily, &all, Some("bad"), OutputFormat::Json).is_err());
    }
}
