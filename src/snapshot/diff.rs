//! Schema Diff Engine
//!
//! Compares two snapshots and classifies every difference.
//! This is the "git diff" for a schema: tables first, then columns, then the
//! attributes of columns present on both sides.

use super::error::SnapshotResult;
use super::model::{Column, Snapshot, SnapshotId, Table};
use super::store::SnapshotStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

/// Type of schema change detected
///
/// Declaration order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// Categories of schema objects. Declaration order is output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    Column,
}

/// The attribute a `Modified` change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    DataType,
    CharacterMaxLength,
    Nullable,
    DefaultExpression,
    OrdinalPosition,
    Kind,
    Owner,
}

impl Attribute {
    pub fn label(&self) -> &'static str {
        match self {
            Attribute::DataType => "data type",
            Attribute::CharacterMaxLength => "character max length",
            Attribute::Nullable => "nullable",
            Attribute::DefaultExpression => "default",
            Attribute::OrdinalPosition => "ordinal position",
            Attribute::Kind => "kind",
            Attribute::Owner => "owner",
        }
    }
}

/// A single classified difference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub kind: ChangeKind,
    pub object_type: ObjectType,
    /// `table` or `table.column`
    pub object_name: String,
    /// Table the change belongs to
    pub table: String,
    /// Human-readable description
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl Change {
    fn presence(kind: ChangeKind, object_type: ObjectType, table: &str, object_name: String, detail: String) -> Self {
        Self {
            kind,
            object_type,
            object_name,
            table: table.to_string(),
            detail,
            attribute: None,
            before: None,
            after: None,
        }
    }

    fn modified(
        object_type: ObjectType,
        table: &str,
        object_name: String,
        attribute: Attribute,
        before: String,
        after: String,
    ) -> Self {
        let subject = match object_type {
            ObjectType::Table => format!("Table '{}'", table),
            ObjectType::Column => format!("Column '{}'", object_name),
        };
        Self {
            kind: ChangeKind::Modified,
            object_type,
            detail: format!("{} {}: {} → {}", subject, attribute.label(), before, after),
            object_name,
            table: table.to_string(),
            attribute: Some(attribute),
            before: Some(before),
            after: Some(after),
        }
    }
}

/// Extra, opt-in comparisons.
///
/// Defaults and ordinal positions are skipped unless asked for: default text
/// varies cosmetically and ordinal position tracks storage order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffOptions {
    pub compare_defaults: bool,
    pub compare_ordinal_positions: bool,
    /// Table kind and owner
    pub compare_table_attributes: bool,
}

/// Summary statistics for the diff
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub tables_added: usize,
    pub tables_removed: usize,
    /// Tables present on both sides with at least one change
    pub tables_modified: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
    pub total_changes: usize,
}

impl DiffSummary {
    fn from_changes(changes: &[Change]) -> Self {
        let mut summary = DiffSummary {
            total_changes: changes.len(),
            ..Default::default()
        };
        let mut modified_tables: BTreeSet<&str> = BTreeSet::new();

        for change in changes {
            match (change.object_type, change.kind) {
                (ObjectType::Table, ChangeKind::Added) => summary.tables_added += 1,
                (ObjectType::Table, ChangeKind::Removed) => summary.tables_removed += 1,
                (ObjectType::Table, ChangeKind::Modified) => {
                    modified_tables.insert(&change.table);
                }
                (ObjectType::Column, kind) => {
                    match kind {
                        ChangeKind::Added => summary.columns_added += 1,
                        ChangeKind::Removed => summary.columns_removed += 1,
                        ChangeKind::Modified => summary.columns_modified += 1,
                    }
                    modified_tables.insert(&change.table);
                }
            }
        }

        summary.tables_modified = modified_tables.len();
        summary
    }
}

/// Complete diff between two snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
    pub from_id: Option<SnapshotId>,
    pub to_id: Option<SnapshotId>,
    pub from_captured_at: DateTime<Utc>,
    pub to_captured_at: DateTime<Utc>,
    pub changes: Vec<Change>,
    pub summary: DiffSummary,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// The diff engine that compares schema snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compare two snapshots with the default attribute set
    pub fn compare(old: &Snapshot, new: &Snapshot) -> Vec<Change> {
        Self::compare_with(old, new, &DiffOptions::default())
    }

    /// Compare two snapshots.
    ///
    /// Output order: tables before columns; added, removed, modified; then by
    /// object name. Attribute changes on one column keep their comparison order.
    pub fn compare_with(old: &Snapshot, new: &Snapshot, options: &DiffOptions) -> Vec<Change> {
        let mut changes = Vec::new();
        Self::diff_tables(old.tables(), new.tables(), options, &mut changes);

        changes.sort_by(|a, b| {
            a.object_type
                .cmp(&b.object_type)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.object_name.cmp(&b.object_name))
        });
        changes
    }

    pub fn diff(old: &Snapshot, new: &Snapshot) -> SchemaDiff {
        Self::diff_with(old, new, &DiffOptions::default())
    }

    pub fn diff_with(old: &Snapshot, new: &Snapshot, options: &DiffOptions) -> SchemaDiff {
        let changes = Self::compare_with(old, new, options);
        let summary = DiffSummary::from_changes(&changes);

        SchemaDiff {
            from_id: old.id(),
            to_id: new.id(),
            from_captured_at: old.created_at(),
            to_captured_at: new.created_at(),
            changes,
            summary,
        }
    }

    /// Load two stored snapshots and diff them
    pub fn compare_stored(
        store: &SnapshotStore,
        old_id: SnapshotId,
        new_id: SnapshotId,
        options: &DiffOptions,
    ) -> SnapshotResult<SchemaDiff> {
        let old = store.get(old_id)?;
        let new = store.get(new_id)?;
        Ok(Self::diff_with(&old, &new, options))
    }

    /// Diff the two most recently captured snapshots
    pub fn compare_latest(store: &SnapshotStore, options: &DiffOptions) -> SnapshotResult<SchemaDiff> {
        let (old_id, new_id) = store.latest_two()?;
        Self::compare_stored(store, old_id, new_id, options)
    }

    fn diff_tables(old_tables: &[Table], new_tables: &[Table], options: &DiffOptions, changes: &mut Vec<Change>) {
        let old_map: BTreeMap<&str, &Table> = old_tables.iter().map(|t| (t.name.as_str(), t)).collect();
        let new_map: BTreeMap<&str, &Table> = new_tables.iter().map(|t| (t.name.as_str(), t)).collect();

        for (name, table) in &new_map {
            if !old_map.contains_key(name) {
                changes.push(Change::presence(
                    ChangeKind::Added,
                    ObjectType::Table,
                    name,
                    name.to_string(),
                    format!("Table '{}' was added with {} column(s)", name, table.columns.len()),
                ));
            }
        }

        for (name, table) in &old_map {
            if !new_map.contains_key(name) {
                changes.push(Change::presence(
                    ChangeKind::Removed,
                    ObjectType::Table,
                    name,
                    name.to_string(),
                    format!("Table '{}' was removed ({} column(s))", name, table.columns.len()),
                ));
            }
        }

        for (name, old_table) in &old_map {
            if let Some(new_table) = new_map.get(name) {
                if options.compare_table_attributes {
                    Self::compare_table_attributes(old_table, new_table, changes);
                }
                Self::diff_columns(old_table, new_table, options, changes);
            }
        }
    }

    fn compare_table_attributes(old: &Table, new: &Table, changes: &mut Vec<Change>) {
        if old.kind != new.kind {
            changes.push(Change::modified(
                ObjectType::Table,
                &old.name,
                old.name.clone(),
                Attribute::Kind,
                old.kind.to_string(),
                new.kind.to_string(),
            ));
        }
        if old.owner != new.owner {
            changes.push(Change::modified(
                ObjectType::Table,
                &old.name,
                old.name.clone(),
                Attribute::Owner,
                render_optional(&old.owner),
                render_optional(&new.owner),
            ));
        }
    }

    fn diff_columns(old_table: &Table, new_table: &Table, options: &DiffOptions, changes: &mut Vec<Change>) {
        let table = old_table.name.as_str();
        let old_cols: BTreeMap<&str, &Column> = old_table.columns.iter().map(|c| (c.name.as_str(), c)).collect();
        let new_cols: BTreeMap<&str, &Column> = new_table.columns.iter().map(|c| (c.name.as_str(), c)).collect();

        for (name, col) in &new_cols {
            if !old_cols.contains_key(name) {
                changes.push(Change::presence(
                    ChangeKind::Added,
                    ObjectType::Column,
                    table,
                    format!("{}.{}", table, name),
                    format!(
                        "Column '{}' was added to table '{}' (type: {}, nullable: {})",
                        name, table, col.data_type, col.nullable
                    ),
                ));
            }
        }

        for (name, col) in &old_cols {
            if !new_cols.contains_key(name) {
                changes.push(Change::presence(
                    ChangeKind::Removed,
                    ObjectType::Column,
                    table,
                    format!("{}.{}", table, name),
                    format!(
                        "Column '{}' was removed from table '{}' (type: {})",
                        name, table, col.data_type
                    ),
                ));
            }
        }

        for (name, old_col) in &old_cols {
            if let Some(new_col) = new_cols.get(name) {
                Self::compare_columns(table, old_col, new_col, options, changes);
            }
        }
    }

    /// One change per differing attribute
    fn compare_columns(table: &str, old: &Column, new: &Column, options: &DiffOptions, changes: &mut Vec<Change>) {
        let object_name = format!("{}.{}", table, old.name);
        let mut push = |attribute: Attribute, before: String, after: String| {
            changes.push(Change::modified(
                ObjectType::Column,
                table,
                object_name.clone(),
                attribute,
                before,
                after,
            ));
        };

        if old.data_type != new.data_type {
            push(Attribute::DataType, old.data_type.clone(), new.data_type.clone());
        }

        // Present on one side only counts as a change
        if old.character_max_length != new.character_max_length {
            push(
                Attribute::CharacterMaxLength,
                render_optional(&old.character_max_length),
                render_optional(&new.character_max_length),
            );
        }

        if old.nullable != new.nullable {
            push(Attribute::Nullable, old.nullable.to_string(), new.nullable.to_string());
        }

        if options.compare_defaults && old.default_expression != new.default_expression {
            push(
                Attribute::DefaultExpression,
                render_optional(&old.default_expression),
                render_optional(&new.default_expression),
            );
        }

        if options.compare_ordinal_positions && old.ordinal_position != new.ordinal_position {
            push(
                Attribute::OrdinalPosition,
                old.ordinal_position.to_string(),
                new.ordinal_position.to_string(),
            );
        }
    }
}

fn render_optional<T: Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{SnapshotError, TableKind};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn users(name_len: i32, name_nullable: bool) -> Table {
        Table::new(
            "users",
            TableKind::BaseTable,
            vec![
                Column::new("id", "integer", false, 1),
                Column::new("name", "character varying", name_nullable, 2).with_max_length(name_len),
            ],
        )
    }

    fn orders() -> Table {
        Table::new("orders", TableKind::BaseTable, vec![Column::new("id", "integer", false, 1)])
    }

    fn snapshot(minute: u32, tables: Vec<Table>) -> Snapshot {
        Snapshot::new("public", at(minute), tables).unwrap()
    }

    fn names(changes: &[Change]) -> Vec<(ChangeKind, ObjectType, &str)> {
        changes
            .iter()
            .map(|c| (c.kind, c.object_type, c.object_name.as_str()))
            .collect()
    }

    #[test]
    fn test_added_table() {
        let old = snapshot(0, vec![users(50, false)]);
        let new = snapshot(1, vec![users(50, false), orders()]);

        let changes = DiffEngine::compare(&old, &new);
        assert_eq!(names(&changes), vec![(ChangeKind::Added, ObjectType::Table, "orders")]);
        assert!(changes[0].detail.contains("orders"));
    }

    #[test]
    fn test_modified_column_attributes_reported_separately() {
        let old = snapshot(0, vec![users(50, false)]);
        let new = snapshot(1, vec![users(100, true)]);

        let changes = DiffEngine::compare(&old, &new);
        assert_eq!(changes.len(), 2);

        assert_eq!(changes[0].object_name, "users.name");
        assert_eq!(changes[0].attribute, Some(Attribute::CharacterMaxLength));
        assert_eq!(changes[0].before.as_deref(), Some("50"));
        assert_eq!(changes[0].after.as_deref(), Some("100"));
        assert!(changes[0].detail.contains("50 → 100"));

        assert_eq!(changes[1].object_name, "users.name");
        assert_eq!(changes[1].attribute, Some(Attribute::Nullable));
        assert_eq!(changes[1].before.as_deref(), Some("false"));
        assert_eq!(changes[1].after.as_deref(), Some("true"));
    }

    #[test]
    fn test_identical_content_has_no_changes() {
        let old = snapshot(0, vec![users(50, false), orders()]);
        let new = snapshot(59, vec![orders(), users(50, false)]);

        assert!(DiffEngine::compare(&old, &new).is_empty());
        assert!(DiffEngine::diff(&old, &new).is_empty());
    }

    #[test]
    fn test_add_remove_antisymmetry() {
        let a = snapshot(0, vec![users(50, false)]);
        let b = snapshot(1, vec![orders()]);

        let forward = DiffEngine::compare(&a, &b);
        let backward = DiffEngine::compare(&b, &a);

        assert_eq!(
            names(&forward),
            vec![
                (ChangeKind::Added, ObjectType::Table, "orders"),
                (ChangeKind::Removed, ObjectType::Table, "users"),
            ]
        );
        assert_eq!(
            names(&backward),
            vec![
                (ChangeKind::Added, ObjectType::Table, "users"),
                (ChangeKind::Removed, ObjectType::Table, "orders"),
            ]
        );
    }

    #[test]
    fn test_output_ordering() {
        let old = snapshot(
            0,
            vec![
                users(50, false),
                Table::new("zeta", TableKind::BaseTable, vec![]),
                Table::new(
                    "accounts",
                    TableKind::BaseTable,
                    vec![
                        Column::new("id", "integer", false, 1),
                        Column::new("legacy", "text", true, 2),
                    ],
                ),
            ],
        );
        let new = snapshot(
            1,
            vec![
                Table::new(
                    "users",
                    TableKind::BaseTable,
                    vec![
                        Column::new("id", "bigint", false, 1),
                        Column::new("name", "character varying", false, 2).with_max_length(50),
                        Column::new("email", "text", true, 3),
                    ],
                ),
                Table::new("alpha", TableKind::View, vec![]),
                Table::new(
                    "accounts",
                    TableKind::BaseTable,
                    vec![
                        Column::new("id", "integer", false, 1),
                        Column::new("created", "timestamp", false, 2),
                    ],
                ),
            ],
        );

        let changes = DiffEngine::compare(&old, &new);
        assert_eq!(
            names(&changes),
            vec![
                (ChangeKind::Added, ObjectType::Table, "alpha"),
                (ChangeKind::Removed, ObjectType::Table, "zeta"),
                (ChangeKind::Added, ObjectType::Column, "accounts.created"),
                (ChangeKind::Added, ObjectType::Column, "users.email"),
                (ChangeKind::Removed, ObjectType::Column, "accounts.legacy"),
                (ChangeKind::Modified, ObjectType::Column, "users.id"),
            ]
        );
        assert_eq!(changes[5].attribute, Some(Attribute::DataType));
    }

    #[test]
    fn test_max_length_presence_change() {
        let old = snapshot(
            0,
            vec![Table::new(
                "notes",
                TableKind::BaseTable,
                vec![Column::new("body", "character varying", true, 1).with_max_length(255)],
            )],
        );
        let new = snapshot(
            1,
            vec![Table::new("notes", TableKind::BaseTable, vec![Column::new("body", "text", true, 1)])],
        );

        let changes = DiffEngine::compare(&old, &new);
        let attributes: Vec<_> = changes.iter().map(|c| c.attribute).collect();
        assert_eq!(
            attributes,
            vec![Some(Attribute::DataType), Some(Attribute::CharacterMaxLength)]
        );
        assert_eq!(changes[1].after.as_deref(), Some("none"));
    }

    #[test]
    fn test_defaults_and_positions_ignored_unless_requested() {
        let old = snapshot(
            0,
            vec![Table::new(
                "t",
                TableKind::BaseTable,
                vec![
                    Column::new("a", "integer", false, 1).with_default("0"),
                    Column::new("b", "integer", false, 2),
                ],
            )],
        );
        let new = snapshot(
            1,
            vec![Table::new(
                "t",
                TableKind::BaseTable,
                vec![
                    Column::new("a", "integer", false, 2).with_default("1"),
                    Column::new("b", "integer", false, 1),
                ],
            )],
        );

        assert!(DiffEngine::compare(&old, &new).is_empty());

        let options = DiffOptions {
            compare_defaults: true,
            compare_ordinal_positions: true,
            ..Default::default()
        };
        let changes = DiffEngine::compare_with(&old, &new, &options);
        let found: Vec<_> = changes
            .iter()
            .map(|c| (c.object_name.as_str(), c.attribute))
            .collect();
        assert_eq!(
            found,
            vec![
                ("t.a", Some(Attribute::DefaultExpression)),
                ("t.a", Some(Attribute::OrdinalPosition)),
                ("t.b", Some(Attribute::OrdinalPosition)),
            ]
        );
    }

    #[test]
    fn test_table_attributes_opt_in() {
        let old = snapshot(0, vec![orders().with_owner("alice")]);
        let new = snapshot(
            1,
            vec![Table::new("orders", TableKind::View, orders().columns).with_owner("bob")],
        );

        assert!(DiffEngine::compare(&old, &new).is_empty());

        let options = DiffOptions {
            compare_table_attributes: true,
            ..Default::default()
        };
        let changes = DiffEngine::compare_with(&old, &new, &options);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.kind == ChangeKind::Modified && c.object_type == ObjectType::Table));
        assert_eq!(changes[0].attribute, Some(Attribute::Kind));
        assert_eq!(changes[1].attribute, Some(Attribute::Owner));
        assert_eq!(changes[1].before.as_deref(), Some("alice"));
    }

    #[test]
    fn test_summary_counts() {
        let old = snapshot(0, vec![users(50, false), Table::new("gone", TableKind::View, vec![])]);
        let new = snapshot(
            1,
            vec![
                Table::new(
                    "users",
                    TableKind::BaseTable,
                    vec![
                        Column::new("id", "integer", false, 1),
                        Column::new("name", "character varying", true, 2).with_max_length(80),
                        Column::new("email", "text", true, 3),
                    ],
                ),
                orders(),
            ],
        );

        let diff = DiffEngine::diff(&old, &new);
        assert_eq!(
            diff.summary,
            DiffSummary {
                tables_added: 1,
                tables_removed: 1,
                tables_modified: 1,
                columns_added: 1,
                columns_removed: 0,
                columns_modified: 2,
                total_changes: 5,
            }
        );
    }

    #[test]
    fn test_compare_stored_and_latest() {
        let store = SnapshotStore::in_memory().unwrap();
        let first = store.save(&snapshot(0, vec![users(50, false)])).unwrap();
        let second = store.save(&snapshot(1, vec![users(50, false), orders()])).unwrap();

        let diff = DiffEngine::compare_stored(&store, first, second, &DiffOptions::default()).unwrap();
        assert_eq!(diff.from_id, Some(first));
        assert_eq!(diff.to_id, Some(second));
        assert_eq!(diff.summary.tables_added, 1);

        let latest = DiffEngine::compare_latest(&store, &DiffOptions::default()).unwrap();
        assert_eq!(latest.from_id, Some(first));
        assert_eq!(latest.changes, diff.changes);

        assert!(matches!(
            DiffEngine::compare_stored(&store, first, 404, &DiffOptions::default()),
            Err(SnapshotError::NotFound(404))
        ));
    }

    #[test]
    fn test_compare_latest_needs_two() {
        let store = SnapshotStore::in_memory().unwrap();
        store.save(&snapshot(0, vec![orders()])).unwrap();
        assert!(matches!(
            DiffEngine::compare_latest(&store, &DiffOptions::default()),
            Err(SnapshotError::InsufficientData { available: 1 })
        ));
    }

    #[test]
    fn test_serialized_change_shape() {
        let old = snapshot(0, vec![]);
        let new = snapshot(1, vec![orders()]);
        let diff = DiffEngine::diff(&old, &new);
        let json = serde_json::to_value(&diff.changes[0]).unwrap();
        assert_eq!(json["kind"], "added");
        assert_eq!(json["objectType"], "table");
        assert_eq!(json["objectName"], "orders");
        assert!(json.get("attribute").is_none());
    }
}
