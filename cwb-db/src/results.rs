//! Aggregated result tables, one per cadence.
//!
//! Rows are upserted by `(objectid, year, day)`: re-aggregating a unit
//! replaces the earlier row (last write wins). Besides the histogram JSON
//! each row keeps the valid pixel count and mean so they can be filtered
//! in SQL without decoding the histogram.

use crate::Database;
use cwb_core::aggregation::{
    AggregationResult, PixelHistogram, QueriedResult, ResultQuery, ResultStore, Statistic,
};
use cwb_core::cadence::Cadence;
use cwb_utils::dates;
use rusqlite::params;

fn results_table(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Daily => "results_daily",
        Cadence::Weekly => "results_weekly",
    }
}

impl Database {
    fn write_results(&self, results: &[AggregationResult]) -> anyhow::Result<()> {
        self.transaction(|tx| {
            for cadence in Cadence::ALL {
                let mut stmt = tx.prepare(&format!(
                    "INSERT OR REPLACE INTO {} (objectid, year, day, no_data, valid_count, mean, histogram)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    results_table(cadence)
                ))?;
                for r in results.iter().filter(|r| r.cadence == cadence) {
                    let (valid_count, mean, histogram) = match r.statistic.histogram() {
                        Some(h) => (
                            h.valid_count() as i64,
                            h.mean(),
                            Some(serde_json::to_string(h.counts())?),
                        ),
                        None => (0, None, None),
                    };
                    stmt.execute(params![
                        r.objectid,
                        r.year,
                        r.day,
                        r.statistic.is_no_data(),
                        valid_count,
                        mean,
                        histogram,
                    ])?;
                }
            }
            Ok(())
        })?;
        log::debug!("[CWB] results: saved {} results", results.len());
        Ok(())
    }

    fn read_results(&self, query: &ResultQuery) -> anyhow::Result<Vec<AggregationResult>> {
        let (lo, hi) = query.ordinal_bounds();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT year, day, histogram FROM {}
             WHERE objectid = ?1 AND (year * 1000 + day) BETWEEN ?2 AND ?3
             ORDER BY year, day",
            results_table(query.cadence)
        ))?;
        let rows = stmt
            .query_map(params![query.objectid, lo, hi], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut results = Vec::with_capacity(rows.len());
        for (year, day, histogram) in rows {
            let statistic = match histogram {
                Some(json) => {
                    let counts: Vec<u64> = serde_json::from_str(&json)?;
                    Statistic::from_histogram(PixelHistogram::from_counts(counts)?)
                }
                None => Statistic::NoData,
            };
            results.push(AggregationResult {
                objectid: query.objectid,
                year,
                day,
                cadence: query.cadence,
                statistic,
            });
        }
        log::debug!(
            "[CWB] results: query for {} {} returned {} rows",
            query.objectid,
            query.cadence,
            results.len()
        );
        Ok(results)
    }

    /// Number of stored results for one image date.
    pub fn result_count(&self, cadence: Cadence, year: i32, day: u32) -> anyhow::Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE (year * 1000 + day) = ?1",
                results_table(cadence)
            ),
            params![dates::ordinal_key(year, day)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl ResultStore for Database {
    fn save_results(&self, results: &[AggregationResult]) -> cwb_core::Result<()> {
        Ok(self.write_results(results)?)
    }

    fn query_results(&self, query: &ResultQuery) -> cwb_core::Result<Vec<QueriedResult>> {
        let ranges = query.value_ranges.as_deref();
        Ok(self
            .read_results(query)?
            .into_iter()
            .map(|r| QueriedResult::new(r, ranges))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwb_core::aggregation::{AggregationUnit, ValueRange};
    use cwb_core::cadence::ImageDate;

    fn result(objectid: i64, year: i32, day: u32, cadence: Cadence, values: &[u8]) -> AggregationResult {
        let date = ImageDate::new(year, day, cadence).unwrap();
        let mut h = PixelHistogram::new();
        for v in values {
            h.add(*v);
        }
        AggregationResult::new(AggregationUnit::new(objectid, &date), Statistic::from_histogram(h))
    }

    #[test]
    fn save_is_an_upsert() {
        let db = Database::new().unwrap();
        db.save_results(&[result(1, 2024, 200, Cadence::Daily, &[10, 20])]).unwrap();
        db.save_results(&[result(1, 2024, 200, Cadence::Daily, &[30])]).unwrap();

        let rows = db.query_results(&ResultQuery::new(1, Cadence::Daily)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result.statistic.mean(), Some(30.0));
        assert_eq!(db.result_count(Cadence::Daily, 2024, 200).unwrap(), 1);
    }

    #[test]
    fn no_data_round_trips() {
        let db = Database::new().unwrap();
        let r = result(4, 2024, 10, Cadence::Weekly, &[]);
        assert!(r.statistic.is_no_data());
        db.save_results(&[r.clone()]).unwrap();
        let rows = db.query_results(&ResultQuery::new(4, Cadence::Weekly)).unwrap();
        assert_eq!(rows[0].result, r);
    }

    #[test]
    fn cadences_use_separate_tables() {
        let db = Database::new().unwrap();
        db.save_results(&[
            result(1, 2024, 200, Cadence::Daily, &[1]),
            result(1, 2024, 200, Cadence::Weekly, &[2]),
        ])
        .unwrap();
        let daily = db.query_results(&ResultQuery::new(1, Cadence::Daily)).unwrap();
        let weekly = db.query_results(&ResultQuery::new(1, Cadence::Weekly)).unwrap();
        assert_eq!(daily[0].result.statistic.mean(), Some(1.0));
        assert_eq!(weekly[0].result.statistic.mean(), Some(2.0));
    }

    #[test]
    fn query_filters_by_year_and_day() {
        let db = Database::new().unwrap();
        db.save_results(&[
            result(1, 2023, 360, Cadence::Daily, &[1]),
            result(1, 2024, 5, Cadence::Daily, &[1]),
            result(1, 2024, 100, Cadence::Daily, &[1]),
            result(2, 2024, 5, Cadence::Daily, &[1]),
        ])
        .unwrap();

        let q = ResultQuery::new(1, Cadence::Daily).starting(2023, Some(361)).ending(2024, Some(99));
        let rows = db.query_results(&q).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].result.year, rows[0].result.day), (2024, 5));

        let whole_2024 = ResultQuery::new(1, Cadence::Daily).starting(2024, None).ending(2024, None);
        let days: Vec<u32> = db
            .query_results(&whole_2024)
            .unwrap()
            .iter()
            .map(|r| r.result.day)
            .collect();
        assert_eq!(days, vec![5, 100]);
    }

    #[test]
    fn query_bins_value_ranges() {
        let db = Database::new().unwrap();
        db.save_results(&[
            result(1, 2024, 1, Cadence::Daily, &[0, 50, 100, 200, 255]),
            result(1, 2024, 2, Cadence::Daily, &[]),
        ])
        .unwrap();
        let q = ResultQuery::new(1, Cadence::Daily)
            .with_ranges(vec![ValueRange::new(0, 99).unwrap(), ValueRange::new(100, 253).unwrap()]);
        let rows = db.query_results(&q).unwrap();
        assert_eq!(rows[0].range_counts, vec![2, 2]);
        assert_eq!(rows[1].range_counts, vec![0, 0]);
    }
}
