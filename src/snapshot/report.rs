//! Reports and export
//!
//! Markdown rendering of diffs and snapshots, plus snapshot export.

use super::diff::{Change, ChangeKind, ObjectType, SchemaDiff};
use super::error::SnapshotResult;
use super::model::Snapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Supported export formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Markdown,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(format!("Unsupported format '{}', expected json, csv or markdown", other)),
        }
    }
}

/// Render a snapshot in the requested format
pub fn export_snapshot(snapshot: &Snapshot, format: ExportFormat) -> SnapshotResult<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        ExportFormat::Csv => render_snapshot_csv(snapshot),
        ExportFormat::Markdown => Ok(render_snapshot_markdown(snapshot)),
    }
}

const CSV_HEADER: [&str; 8] = [
    "table_name",
    "table_type",
    "table_owner",
    "column_name",
    "data_type",
    "is_nullable",
    "column_default",
    "ordinal_position",
];

/// One row per table/column pair. Tables without columns produce no rows.
pub fn render_snapshot_csv(snapshot: &Snapshot) -> SnapshotResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for table in snapshot.tables() {
        for col in &table.columns {
            writer.write_record([
                table.name.as_str(),
                table.kind.as_str(),
                table.owner.as_deref().unwrap_or(""),
                col.name.as_str(),
                col.data_type.as_str(),
                if col.nullable { "YES" } else { "NO" },
                col.default_expression.as_deref().unwrap_or(""),
                col.ordinal_position.to_string().as_str(),
            ])?;
        }
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

/// "Schema Change Report" for a diff
pub fn render_diff_markdown(diff: &SchemaDiff, generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("# Schema Change Report\n\n");

    if let (Some(from), Some(to)) = (diff.from_id, diff.to_id) {
        let _ = writeln!(out, "**Comparing snapshots:** {} → {}\n", from, to);
    }
    let _ = writeln!(
        out,
        "**Captured:** {} → {}\n",
        diff.from_captured_at.format(TIMESTAMP_FORMAT),
        diff.to_captured_at.format(TIMESTAMP_FORMAT)
    );
    let _ = writeln!(out, "**Generated:** {}\n", generated_at.format(TIMESTAMP_FORMAT));
    let _ = writeln!(out, "**Total changes:** {}\n", diff.changes.len());

    if diff.changes.is_empty() {
        out.push_str("No changes detected between schemas.\n");
        return out;
    }

    let of_kind = |kind: ChangeKind| -> Vec<&Change> {
        diff.changes.iter().filter(|c| c.kind == kind).collect()
    };
    let added = of_kind(ChangeKind::Added);
    let removed = of_kind(ChangeKind::Removed);
    let modified = of_kind(ChangeKind::Modified);

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- **Added:** {} objects", added.len());
    let _ = writeln!(out, "- **Removed:** {} objects", removed.len());
    let _ = writeln!(out, "- **Modified:** {} objects\n", modified.len());

    write_section(&mut out, "Added Objects", &added);
    write_section(&mut out, "Removed Objects", &removed);
    write_section(&mut out, "Modified Objects", &modified);

    out
}

fn write_section(out: &mut String, title: &str, changes: &[&Change]) {
    if changes.is_empty() {
        return;
    }

    let _ = writeln!(out, "## {}\n", title);
    for change in changes {
        let label = match change.object_type {
            ObjectType::Table => "Table",
            ObjectType::Column => "Column",
        };
        let _ = write!(out, "- **{}:** `{}`", label, change.object_name);
        if change.object_type == ObjectType::Column {
            let _ = write!(out, " (in table `{}`)", change.table);
        }
        let _ = writeln!(out, "\n  - {}", change.detail);
        if let (Some(before), Some(after)) = (&change.before, &change.after) {
            let _ = writeln!(out, "    - Old: `{}`", before);
            let _ = writeln!(out, "    - New: `{}`", after);
        }
    }
    out.push('\n');
}

/// Per-table Markdown description of one snapshot
pub fn render_snapshot_markdown(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Schema Report - {}\n", snapshot.schema_name());
    if let Some(id) = snapshot.id() {
        let _ = writeln!(out, "**Snapshot:** {}\n", id);
    }
    let _ = writeln!(out, "**Captured:** {}\n", snapshot.created_at().format(TIMESTAMP_FORMAT));
    let _ = writeln!(out, "**Total Tables:** {}\n", snapshot.table_count());

    for table in snapshot.tables() {
        let _ = writeln!(out, "## Table: {}\n", table.name);
        let _ = writeln!(out, "- **Type:** {}", table.kind);
        let _ = writeln!(out, "- **Owner:** {}", table.owner.as_deref().unwrap_or("unknown"));
        let _ = writeln!(out, "- **Columns:** {}\n", table.columns.len());

        if !table.columns.is_empty() {
            out.push_str("| Column | Type | Max Length | Nullable | Default | Position |\n");
            out.push_str("|--------|------|------------|----------|---------|----------|\n");
            for col in &table.columns {
                let max_length = col
                    .character_max_length
                    .map(|l| l.to_string())
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    escape_cell(&col.name),
                    escape_cell(&col.data_type),
                    max_length,
                    if col.nullable { "YES" } else { "NO" },
                    escape_cell(col.default_expression.as_deref().unwrap_or("NULL")),
                    col.ordinal_position
                );
            }
            out.push('\n');
        }
    }

    out
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}
