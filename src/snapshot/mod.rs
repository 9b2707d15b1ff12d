//! Schema Snapshot Module
//!
//! Detecting what changed in a database schema.
//! This module provides:
//! - Schema snapshots (validated point-in-time captures)
//! - Durable snapshot storage
//! - Schema diff engine (comparing snapshots)
//! - Markdown reports and export

pub mod diff;
pub mod error;
pub mod model;
pub mod report;
pub mod store;

pub use diff::{Attribute, Change, ChangeKind, DiffEngine, DiffOptions, DiffSummary, ObjectType, SchemaDiff};
pub use error::{SnapshotError, SnapshotResult};
pub use model::{Column, Snapshot, SnapshotId, Table, TableKind};
pub use report::{export_snapshot, render_diff_markdown, render_snapshot_markdown, ExportFormat};
pub use store::{SnapshotStore, SnapshotSummary, DEFAULT_LIST_LIMIT};
