//! End-to-end history: filter, capture, store, reopen, diff, report.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use schema_tracker::filter::{TableFilter, TableFilterRule};
use schema_tracker::snapshot::{
    render_diff_markdown, Attribute, ChangeKind, Column, DiffEngine, DiffOptions, ObjectType, Snapshot,
    SnapshotError, SnapshotStore, Table, TableKind,
};

fn catalog(name_length: i32, with_orders: bool) -> Vec<Table> {
    let mut tables = vec![
        Table::new(
            "users",
            TableKind::BaseTable,
            vec![
                Column::new("id", "integer", false, 1).with_default("nextval('users_id_seq'::regclass)"),
                Column::new("name", "character varying", false, 2).with_max_length(name_length),
            ],
        )
        .with_owner("app"),
        Table::new("tmp_import", TableKind::BaseTable, vec![Column::new("raw", "text", true, 1)]),
    ];
    if with_orders {
        tables.push(Table::new(
            "orders",
            TableKind::BaseTable,
            vec![
                Column::new("id", "integer", false, 1),
                Column::new("user_id", "integer", false, 2),
            ],
        ));
    }
    tables
}

fn capture(minute: u32, tables: Vec<Table>, filter: &TableFilter) -> Snapshot {
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, minute, 0).unwrap();
    Snapshot::new("public", at, filter.retain_tables(tables)).unwrap()
}

#[test]
fn history_survives_reopen_and_diffs_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history").join("schema_metadata.db");

    let filter = TableFilter::new(&TableFilterRule {
        exclude_patterns: vec!["tmp_*".to_string()],
        ..Default::default()
    })
    .unwrap();

    let (first, second) = {
        let store = SnapshotStore::open(&path).unwrap();
        let first = store.save(&capture(0, catalog(50, false), &filter)).unwrap();
        let second = store.save(&capture(30, catalog(100, true), &filter)).unwrap();
        (first, second)
    };
    assert!(second > first);

    let store = SnapshotStore::open(&path).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.latest_two().unwrap(), (first, second));

    let stored = store.get(first).unwrap();
    assert_eq!(stored.id(), Some(first));
    assert!(stored.table("tmp_import").is_none());

    let diff = DiffEngine::compare_latest(&store, &DiffOptions::default()).unwrap();
    let found: Vec<_> = diff
        .changes
        .iter()
        .map(|c| (c.kind, c.object_type, c.object_name.as_str(), c.attribute))
        .collect();
    assert_eq!(
        found,
        vec![
            (ChangeKind::Added, ObjectType::Table, "orders", None),
            (
                ChangeKind::Modified,
                ObjectType::Column,
                "users.name",
                Some(Attribute::CharacterMaxLength)
            ),
        ]
    );

    let report = render_diff_markdown(&diff, Utc::now());
    assert!(report.contains(&format!("**Comparing snapshots:** {} → {}", first, second)));
    assert!(report.contains("## Added Objects"));
    assert!(report.contains("## Modified Objects"));

    let summaries = store.list_recent(10).unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, second);
    assert_eq!(summaries[0].table_count, 2);
    assert_eq!(summaries[1].table_count, 1);
}

#[test]
fn pruned_history_still_serves_latest() {
    let store = SnapshotStore::in_memory().unwrap();
    let filter = TableFilter::allow_all();

    for minute in 0..5 {
        store.save(&capture(minute, catalog(50, minute % 2 == 0), &filter)).unwrap();
    }
    assert_eq!(store.prune(2).unwrap(), 3);

    let remaining = store.list_recent(0).unwrap();
    assert_eq!(remaining.len(), 2);
    assert!(matches!(store.get(1), Err(SnapshotError::NotFound(1))));

    let latest = store.latest().unwrap().unwrap();
    assert_eq!(latest.id(), Some(5));
    assert!(latest.table("orders").is_some());

    let diff = DiffEngine::compare_latest(&store, &DiffOptions::default()).unwrap();
    assert_eq!(diff.summary.tables_added, 1);
    assert_eq!(diff.summary.total_changes, 1);
}
