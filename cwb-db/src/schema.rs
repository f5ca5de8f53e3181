//! SQL schema definitions for the aggregation database.
//!
//! The schema is applied as a single batch when the database is opened.
//! Every statement uses `IF NOT EXISTS`, so reopening an existing file is safe.

/// Returns the full SQL schema as a single batch string.
///
/// **Tile tables:**
/// - `tile_bounds` - Bounds and resolution per (generation, tile)
/// - `tile_assignments` - One row per waterbody with the JSON list of intersecting tiles
///
/// **Retry ledgers** (identical layout, one per cadence):
/// - `retry_daily`, `retry_weekly` - Failed units keyed by (objectid, year, day)
///
/// **Results** (identical layout, one per cadence):
/// - `results_daily`, `results_weekly` - Histogram per (objectid, year, day)
pub fn create_schema() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS tile_bounds (
        gen_year INTEGER NOT NULL,
        gen_day INTEGER NOT NULL,
        tile_id TEXT NOT NULL,
        min_x REAL NOT NULL,
        min_y REAL NOT NULL,
        max_x REAL NOT NULL,
        max_y REAL NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        res_x REAL NOT NULL,
        res_y REAL NOT NULL,
        crs TEXT,
        PRIMARY KEY (gen_year, gen_day, tile_id)
    );

    CREATE TABLE IF NOT EXISTS tile_assignments (
        objectid INTEGER PRIMARY KEY,
        gen_year INTEGER NOT NULL,
        gen_day INTEGER NOT NULL,
        tiles TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS retry_daily (
        objectid INTEGER NOT NULL,
        year INTEGER NOT NULL,
        day INTEGER NOT NULL,
        kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        permanent INTEGER NOT NULL DEFAULT 0,
        first_failed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (objectid, year, day)
    );
    CREATE INDEX IF NOT EXISTS idx_retry_daily_permanent ON retry_daily(permanent);

    CREATE TABLE IF NOT EXISTS retry_weekly (
        objectid INTEGER NOT NULL,
        year INTEGER NOT NULL,
        day INTEGER NOT NULL,
        kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        permanent INTEGER NOT NULL DEFAULT 0,
        first_failed_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (objectid, year, day)
    );
    CREATE INDEX IF NOT EXISTS idx_retry_weekly_permanent ON retry_weekly(permanent);

    CREATE TABLE IF NOT EXISTS results_daily (
        objectid INTEGER NOT NULL,
        year INTEGER NOT NULL,
        day INTEGER NOT NULL,
        no_data INTEGER NOT NULL,
        valid_count INTEGER NOT NULL,
        mean REAL,
        histogram TEXT,
        PRIMARY KEY (objectid, year, day)
    );
    CREATE INDEX IF NOT EXISTS idx_results_daily_date ON results_daily(year, day);

    CREATE TABLE IF NOT EXISTS results_weekly (
        objectid INTEGER NOT NULL,
        year INTEGER NOT NULL,
        day INTEGER NOT NULL,
        no_data INTEGER NOT NULL,
        valid_count INTEGER NOT NULL,
        mean REAL,
        histogram TEXT,
        PRIMARY KEY (objectid, year, day)
    );
    CREATE INDEX IF NOT EXISTS idx_results_weekly_date ON results_weekly(year, day);
    "#
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_is_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(create_schema())
            .expect("Schema SQL should be valid");
    }

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(create_schema()).unwrap();

        let expected_tables = [
            "tile_bounds",
            "tile_assignments",
            "retry_daily",
            "retry_weekly",
            "results_daily",
            "results_weekly",
        ];

        for table in &expected_tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(create_schema()).unwrap();
        conn.execute_batch(create_schema())
            .expect("Applying schema twice should succeed due to IF NOT EXISTS");
    }
}
