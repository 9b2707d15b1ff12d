//! Schema Snapshot Store
//!
//! Durable, append-only history of schema snapshots.
//! Each snapshot is kept twice: the canonical JSON blob (the source of truth) and a
//! normalized projection (one row per table, one row per column) used for
//! listing without decoding blobs. Both are written in the same transaction, and
//! the projection can always be rebuilt from the blobs.

use super::error::{SnapshotError, SnapshotResult};
use super::model::{checksum_of, Snapshot, SnapshotId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Listing limit used when the caller passes 0
pub const DEFAULT_LIST_LIMIT: usize = 20;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at INTEGER NOT NULL,
        schema_name TEXT NOT NULL,
        checksum TEXT NOT NULL,
        snapshot_data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_schema_snapshots_created_at
        ON schema_snapshots(created_at DESC, id DESC);

    CREATE TABLE IF NOT EXISTS table_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        snapshot_id INTEGER NOT NULL REFERENCES schema_snapshots(id) ON DELETE CASCADE,
        table_name TEXT NOT NULL,
        table_kind TEXT NOT NULL,
        table_owner TEXT,
        UNIQUE (snapshot_id, table_name)
    );

    CREATE TABLE IF NOT EXISTS column_metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        table_id INTEGER NOT NULL REFERENCES table_metadata(id) ON DELETE CASCADE,
        column_name TEXT NOT NULL,
        data_type TEXT NOT NULL,
        is_nullable INTEGER NOT NULL,
        column_default TEXT,
        ordinal_position INTEGER NOT NULL,
        character_maximum_length INTEGER,
        UNIQUE (table_id, column_name)
    );
"#;

/// Lightweight listing row, read from the projection only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub created_at: DateTime<Utc>,
    pub schema_name: String,
    pub table_count: usize,
    pub column_count: usize,
    pub checksum: String,
}

/// Store for schema snapshots, backed by SQLite
pub struct SnapshotStore {
    conn: Mutex<Connection>,
    default_list_limit: usize,
}

impl SnapshotStore {
    /// Open (or create) a store at `path`
    pub fn open(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Snapshot store {} opened (journal_mode={})", path.display(), mode);

        Self::init(conn)
    }

    /// In-memory store, gone when dropped
    pub fn in_memory() -> SnapshotResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SnapshotResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            default_list_limit: DEFAULT_LIST_LIMIT,
        })
    }

    /// Override the limit used by `list_recent(0)`
    pub fn with_default_list_limit(mut self, limit: usize) -> Self {
        self.default_list_limit = limit.max(1);
        self
    }

    /// Persist a snapshot and its projection atomically, returning the new id
    pub fn save(&self, snapshot: &Snapshot) -> SnapshotResult<SnapshotId> {
        let blob = snapshot.to_canonical_json()?;
        let checksum = checksum_of(&blob);

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO schema_snapshots (created_at, schema_name, checksum, snapshot_data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot.created_at().timestamp_micros(),
                snapshot.schema_name(),
                checksum,
                blob
            ],
        )?;
        let id = tx.last_insert_rowid();

        write_projection(&tx, id, snapshot)?;
        tx.commit()?;

        info!(
            "Saved snapshot {} of schema {}: {} tables, {} columns",
            id,
            snapshot.schema_name(),
            snapshot.table_count(),
            snapshot.column_count()
        );

        Ok(id)
    }

    /// Load a snapshot from its canonical form
    pub fn get(&self, id: SnapshotId) -> SnapshotResult<Snapshot> {
        let row: Option<(String, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT snapshot_data, checksum FROM schema_snapshots WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let (blob, checksum) = row.ok_or(SnapshotError::NotFound(id))?;
        if checksum_of(&blob) != checksum {
            return Err(SnapshotError::corrupted(id, "checksum mismatch"));
        }

        let snapshot = Snapshot::from_canonical_json(&blob)
            .map_err(|e| SnapshotError::corrupted(id, e.to_string()))?;

        Ok(snapshot.with_id(id))
    }

    /// Most recent snapshots first. A `limit` of 0 uses the store default.
    pub fn list_recent(&self, limit: usize) -> SnapshotResult<Vec<SnapshotSummary>> {
        let limit = if limit == 0 {
            self.default_list_limit
        } else {
            limit
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT s.id, s.created_at, s.schema_name, s.checksum,
                    (SELECT COUNT(*) FROM table_metadata t WHERE t.snapshot_id = s.id),
                    (SELECT COUNT(*) FROM column_metadata c
                        JOIN table_metadata t ON c.table_id = t.id
                        WHERE t.snapshot_id = s.id)
             FROM schema_snapshots s
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            let micros: i64 = row.get(1)?;
            let created_at = DateTime::from_timestamp_micros(micros)
                .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, micros))?;
            let table_count: i64 = row.get(4)?;
            let column_count: i64 = row.get(5)?;

            Ok(SnapshotSummary {
                id: row.get(0)?,
                created_at,
                schema_name: row.get(2)?,
                checksum: row.get(3)?,
                table_count: table_count as usize,
                column_count: column_count as usize,
            })
        })?;

        let summaries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    /// Ids of the two most recent snapshots, oldest first
    pub fn latest_two(&self) -> SnapshotResult<(SnapshotId, SnapshotId)> {
        let recent = self.list_recent(2)?;
        match recent.as_slice() {
            [newer, older] => Ok((older.id, newer.id)),
            _ => Err(SnapshotError::InsufficientData {
                available: recent.len(),
            }),
        }
    }

    /// The most recently captured snapshot, if any
    pub fn latest(&self) -> SnapshotResult<Option<Snapshot>> {
        match self.list_recent(1)?.first() {
            Some(summary) => self.get(summary.id).map(Some),
            None => Ok(None),
        }
    }

    pub fn count(&self) -> SnapshotResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM schema_snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete all but the `keep` most recent snapshots. Projection rows go with them.
    pub fn prune(&self, keep: usize) -> SnapshotResult<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM schema_snapshots WHERE id NOT IN (
                SELECT id FROM schema_snapshots
                ORDER BY created_at DESC, id DESC
                LIMIT ?1
             )",
            params![keep],
        )?;
        tx.commit()?;

        if removed > 0 {
            info!("Pruned {} old snapshots (kept {})", removed, keep);
        }
        Ok(removed)
    }

    /// Re-derive every projection row from the canonical blobs
    pub fn rebuild_projection(&self) -> SnapshotResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let blobs: Vec<(SnapshotId, String, String)> = {
            let mut stmt = tx.prepare("SELECT id, snapshot_data, checksum FROM schema_snapshots ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            let blobs = rows.collect::<Result<Vec<_>, _>>()?;
            blobs
        };

        tx.execute("DELETE FROM table_metadata", [])?;

        for (id, blob, checksum) in &blobs {
            if checksum_of(blob) != *checksum {
                return Err(SnapshotError::corrupted(*id, "checksum mismatch"));
            }
            let snapshot = Snapshot::from_canonical_json(blob)
                .map_err(|e| SnapshotError::corrupted(*id, e.to_string()))?;
            write_projection(&tx, *id, &snapshot)?;
        }
        tx.commit()?;

        info!("Rebuilt projection for {} snapshots", blobs.len());
        Ok(blobs.len())
    }
}

/// Insert the table and column rows for one snapshot
fn write_projection(conn: &Connection, snapshot_id: SnapshotId, snapshot: &Snapshot) -> SnapshotResult<()> {
    let mut insert_table = conn.prepare_cached(
        "INSERT INTO table_metadata (snapshot_id, table_name, table_kind, table_owner)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut insert_column = conn.prepare_cached(
        "INSERT INTO column_metadata
            (table_id, column_name, data_type, is_nullable, column_default,
             ordinal_position, character_maximum_length)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for table in snapshot.tables() {
        insert_table.execute(params![
            snapshot_id,
            table.name,
            table.kind.as_str(),
            table.owner
        ])?;
        let table_id = conn.last_insert_rowid();

        for column in &table.columns {
            insert_column.execute(params![
                table_id,
                column.name,
                column.data_type,
                column.nullable,
                column.default_expression,
                column.ordinal_position,
                column.character_max_length
            ])?;
        }
    }

    Ok(())
}
