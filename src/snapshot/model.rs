//! Snapshot Model
//!
//! Point-in-time capture of one schema: tables, their columns and column attributes.
//! A `Snapshot` is validated and normalized on construction and never changes afterwards.

use super::error::{SnapshotError, SnapshotResult};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// Store-assigned snapshot identifier
pub type SnapshotId = i64;

/// Kind of relation captured in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    BaseTable,
    View,
    ForeignTable,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::BaseTable => "base_table",
            TableKind::View => "view",
            TableKind::ForeignTable => "foreign_table",
        }
    }

    /// Map an `information_schema.tables.table_type` value
    pub fn from_catalog(table_type: &str) -> Option<Self> {
        match table_type {
            "BASE TABLE" => Some(TableKind::BaseTable),
            "VIEW" => Some(TableKind::View),
            "FOREIGN" | "FOREIGN TABLE" => Some(TableKind::ForeignTable),
            _ => None,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Type name as reported by the database
    pub data_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default_expression: Option<String>,
    /// 1-based position within the table
    pub ordinal_position: i32,
    #[serde(default)]
    pub character_max_length: Option<i32>,
}

impl Column {
    pub fn new(
        name: impl Into<String>,
        data_type: impl Into<String>,
        nullable: bool,
        ordinal_position: i32,
    ) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_expression: None,
            ordinal_position,
            character_max_length: None,
        }
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_expression = Some(expression.into());
        self
    }

    pub fn with_max_length(mut self, length: i32) -> Self {
        self.character_max_length = Some(length);
        self
    }
}

/// Table representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub kind: TableKind,
    #[serde(default)]
    pub owner: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, kind: TableKind, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            kind,
            owner: None,
            columns,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Complete schema snapshot at a point in time
///
/// Serializing a snapshot yields its canonical form: fixed field order, tables
/// sorted by name, columns sorted by ordinal position. Two structurally identical
/// snapshots therefore serialize byte-identically. The store-assigned id is not
/// part of the canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SnapshotRepr")]
pub struct Snapshot {
    #[serde(skip)]
    id: Option<SnapshotId>,
    created_at: DateTime<Utc>,
    schema_name: String,
    tables: Vec<Table>,
}

/// Wire shape of the canonical form; every decode goes back through `Snapshot::new`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRepr {
    created_at: DateTime<Utc>,
    schema_name: String,
    tables: Vec<Table>,
}

impl TryFrom<SnapshotRepr> for Snapshot {
    type Error = SnapshotError;

    fn try_from(repr: SnapshotRepr) -> Result<Self, Self::Error> {
        Snapshot::new(repr.schema_name, repr.created_at, repr.tables)
    }
}

impl Snapshot {
    /// Build a validated snapshot.
    ///
    /// Rejects duplicate table names, duplicate column names within a table and
    /// ordinal positions below 1. Tables are sorted by name and columns by
    /// ordinal position (ties broken by name). The capture time is truncated to
    /// whole microseconds, the precision the store keeps.
    pub fn new(
        schema_name: impl Into<String>,
        created_at: DateTime<Utc>,
        mut tables: Vec<Table>,
    ) -> SnapshotResult<Self> {
        let mut seen_tables: HashSet<String> = HashSet::with_capacity(tables.len());

        for table in &mut tables {
            if !seen_tables.insert(table.name.clone()) {
                return Err(SnapshotError::malformed(format!(
                    "duplicate table name '{}'",
                    table.name
                )));
            }

            {
                let mut seen_columns: HashSet<&str> = HashSet::with_capacity(table.columns.len());
                for column in &table.columns {
                    if !seen_columns.insert(column.name.as_str()) {
                        return Err(SnapshotError::malformed(format!(
                            "duplicate column name '{}.{}'",
                            table.name, column.name
                        )));
                    }
                    if column.ordinal_position < 1 {
                        return Err(SnapshotError::malformed(format!(
                            "column '{}.{}' has ordinal position {}, expected >= 1",
                            table.name, column.name, column.ordinal_position
                        )));
                    }
                }
            }

            table.columns.sort_by(|a, b| {
                a.ordinal_position
                    .cmp(&b.ordinal_position)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        tables.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            id: None,
            created_at: created_at.trunc_subsecs(6),
            schema_name: schema_name.into(),
            tables,
        })
    }

    /// Id assigned by the store, `None` until the snapshot has been saved and reloaded
    pub fn id(&self) -> Option<SnapshotId> {
        self.id
    }

    pub(crate) fn with_id(mut self, id: SnapshotId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables
            .binary_search_by(|t| t.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.tables[idx])
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }

    /// Same schema name and the same tables, columns and attributes.
    /// Id and capture time are ignored.
    pub fn same_structure(&self, other: &Snapshot) -> bool {
        self.schema_name == other.schema_name && self.tables == other.tables
    }

    pub fn to_canonical_json(&self) -> SnapshotResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a canonical blob, re-running construction validation
    pub fn from_canonical_json(blob: &str) -> SnapshotResult<Self> {
        let repr: SnapshotRepr = serde_json::from_str(blob)?;
        Snapshot::try_from(repr)
    }

    /// SHA-256 of the canonical form
    pub fn checksum(&self) -> SnapshotResult<String> {
        Ok(checksum_of(&self.to_canonical_json()?))
    }
}

pub(crate) fn checksum_of(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
