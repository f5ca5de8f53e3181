//! SQLite persistence layer for CyAN waterbody aggregation.
//!
//! This crate stores everything the aggregation pipeline needs to survive
//! between runs: tile bounds per generation, the waterbody-to-tile index,
//! the daily and weekly retry ledgers, and the aggregated results.
//!
//! # Architecture
//!
//! - `Arc<Mutex<Connection>>` wrapper so one database is shared by every
//!   worker thread; each statement holds the lock only for its own duration
//! - In-memory SQLite for tests, file-backed SQLite with WAL for the CLI
//! - Typed methods taking and returning `cwb-core` types
//!
//! # Usage
//!
//! ```rust
//! use cwb_core::aggregation::{AggregationResult, AggregationUnit, ResultQuery, ResultStore, Statistic};
//! use cwb_core::cadence::{Cadence, ImageDate};
//! use cwb_db::Database;
//!
//! let db = Database::new().unwrap();
//! let date = ImageDate::new(2024, 200, Cadence::Daily).unwrap();
//! let result = AggregationResult::new(AggregationUnit::new(1, &date), Statistic::NoData);
//! db.save_results(&[result]).unwrap();
//!
//! let rows = db.query_results(&ResultQuery::new(1, Cadence::Daily)).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```
//!
//! # Tables
//!
//! See [`schema::create_schema`] for the full SQL schema.

pub mod models;
pub mod schema;
mod ledger;
mod results;
mod tiles;

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Arc;

/// SQLite database shared across the pipeline.
///
/// Cheaply cloneable (via `Arc`) and safe to use from worker threads.
///
/// # Example
///
/// ```rust
/// use cwb_db::Database;
///
/// let db = Database::new().unwrap();
/// assert!(db.generations().unwrap().is_empty());
/// ```
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create a new in-memory database with the full schema applied.
    pub fn new() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::create_schema())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open (or create) a database file and apply the schema.
    ///
    /// WAL journaling is enabled so readers are not blocked by a run in
    /// progress.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(schema::create_schema())?;
        log::info!("[CWB] db: opened {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
