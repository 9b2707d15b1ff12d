//! Snapshot Error Types
//!
//! Failures raised by the snapshot model, store and diff engine.
//! None of these are transient, so nothing in the core retries.

use super::model::SnapshotId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Caller supplied a snapshot that breaks the model invariants
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Snapshot {0} not found")]
    NotFound(SnapshotId),

    /// A latest-pair comparison needs at least two stored snapshots
    #[error("Need at least 2 snapshots to compare, found {available}")]
    InsufficientData { available: usize },

    /// Stored data no longer matches what was written
    #[error("Snapshot {id} is corrupted: {reason}")]
    Corrupted { id: SnapshotId, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnapshotError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        SnapshotError::MalformedSnapshot(msg.into())
    }

    pub fn corrupted(id: SnapshotId, reason: impl Into<String>) -> Self {
        SnapshotError::Corrupted {
            id,
            reason: reason.into(),
        }
    }
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;
