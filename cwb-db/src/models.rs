//! Summary structs reported by the status command.
//!
//! All structs derive `Serialize` so the CLI can print them as JSON.

use crate::Database;
use cwb_core::cadence::{Cadence, GenerationKey};
use serde::Serialize;

/// Retry ledger counts for one cadence.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerSummary {
    pub cadence: Cadence,
    /// Records still eligible for retry.
    pub pending: u64,
    /// Records that exhausted their attempts.
    pub permanent: u64,
}

/// Overview of everything stored in the database.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoreSummary {
    /// Tile bounds generations, oldest first.
    pub generations: Vec<GenerationKey>,
    /// Waterbodies with a stored tile assignment.
    pub assignments: u64,
    pub ledgers: Vec<LedgerSummary>,
}

impl Database {
    pub fn store_summary(&self) -> anyhow::Result<StoreSummary> {
        Ok(StoreSummary {
            generations: self.generations()?,
            assignments: self.assignment_count()?,
            ledgers: Cadence::ALL
                .iter()
                .map(|c| self.ledger_summary(*c))
                .collect::<anyhow::Result<Vec<_>>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_summary() {
        let db = Database::new().unwrap();
        let summary = db.store_summary().unwrap();
        assert!(summary.generations.is_empty());
        assert_eq!(summary.assignments, 0);
        assert_eq!(summary.ledgers.len(), 2);
        assert_eq!(summary.ledgers[1].cadence, Cadence::Weekly);
    }
}
