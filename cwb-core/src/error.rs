/// Error types for waterbody aggregation
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for aggregation operations
#[derive(Error, Debug)]
pub enum CwbError {
    /// A referenced record (tile bounds, waterbody, tile image) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// No reference raster exists for the requested generation or date
    #[error("Missing reference raster for {year}-{day:03}")]
    MissingReference { year: i32, day: u32 },

    /// A tile or polygon could not be read
    #[error("Read failure: {0}")]
    ReadFailure(String),

    /// Input data is structurally invalid (polygon rings, pixel dimensions)
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The persistence layer rejected a read or write
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Pipeline settings are unusable (zero workers, zero slice size)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O failed while reading an input file
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON document could not be parsed
    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<anyhow::Error> for CwbError {
    fn from(err: anyhow::Error) -> Self {
        CwbError::Storage(format!("{:#}", err))
    }
}

impl CwbError {
    /// Classify this error into one of the four ledger failure kinds.
    pub fn kind(&self) -> FailureKind {
        match self {
            CwbError::NotFound(_) | CwbError::MissingReference { .. } => FailureKind::NotFound,
            CwbError::ReadFailure(_) | CwbError::Io(_) => FailureKind::ReadFailure,
            CwbError::MalformedInput(_) | CwbError::Json(_) | CwbError::Config(_) => {
                FailureKind::MalformedInput
            }
            CwbError::Storage(_) => FailureKind::StorageFailure,
        }
    }

    /// True for errors that must abort a run instead of being ledgered.
    pub fn is_storage(&self) -> bool {
        self.kind() == FailureKind::StorageFailure
    }
}

/// Failure classification persisted alongside retry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    NotFound,
    ReadFailure,
    MalformedInput,
    StorageFailure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::ReadFailure => "read_failure",
            FailureKind::MalformedInput => "malformed_input",
            FailureKind::StorageFailure => "storage_failure",
        }
    }

    /// Parse the stored label; unknown labels map to `ReadFailure`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "not_found" => FailureKind::NotFound,
            "malformed_input" => FailureKind::MalformedInput,
            "storage_failure" => FailureKind::StorageFailure,
            _ => FailureKind::ReadFailure,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type alias for Results using CwbError
pub type Result<T> = std::result::Result<T, CwbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_reference_is_not_found() {
        let err = CwbError::MissingReference { year: 2024, day: 7 };
        assert_eq!(err.kind(), FailureKind::NotFound);
        assert_eq!(err.to_string(), "Missing reference raster for 2024-007");
    }

    #[test]
    fn anyhow_errors_become_storage_failures() {
        let err: CwbError = anyhow::anyhow!("disk full").into();
        assert!(err.is_storage());
        assert_eq!(err.kind(), FailureKind::StorageFailure);
    }

    #[test]
    fn failure_kind_labels_round_trip() {
        for kind in [
            FailureKind::NotFound,
            FailureKind::ReadFailure,
            FailureKind::MalformedInput,
            FailureKind::StorageFailure,
        ] {
            assert_eq!(FailureKind::from_label(kind.as_str()), kind);
        }
    }
}
