//! Snapshot and Diff API Routes
//!
//! Routes for capturing, listing, exporting and comparing schema snapshots.
//! Store calls are synchronous and run on the blocking pool.

use crate::error::{ApiResult, AppError};
use crate::introspection::PostgresCrawler;
use crate::snapshot::{
    export_snapshot as render_export, render_diff_markdown, DiffEngine, DiffOptions, ExportFormat, SchemaDiff,
    Snapshot, SnapshotId, SnapshotStore, SnapshotSummary,
};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

// ==================== Request/Response Types ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreatedResponse {
    pub success: bool,
    pub message: String,
    pub id: SnapshotId,
    pub table_count: usize,
    pub column_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListResponse {
    pub success: bool,
    pub snapshots: Vec<SnapshotSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub success: bool,
    pub id: SnapshotId,
    pub checksum: String,
    pub snapshot: Snapshot,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// Output format plus opt-in comparisons for both diff endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffParams {
    pub format: Option<String>,
    #[serde(default)]
    pub compare_defaults: bool,
    #[serde(default)]
    pub compare_ordinal_positions: bool,
    #[serde(default)]
    pub compare_table_attributes: bool,
}

impl DiffParams {
    fn options(&self) -> DiffOptions {
        DiffOptions {
            compare_defaults: self.compare_defaults,
            compare_ordinal_positions: self.compare_ordinal_positions,
            compare_table_attributes: self.compare_table_attributes,
        }
    }

    fn format(&self) -> ApiResult<ExportFormat> {
        match parse_format(self.format.as_deref())? {
            ExportFormat::Csv => Err(AppError::BadRequest(
                "Diffs are available as json or markdown".to_string(),
            )),
            format => Ok(format),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffQuery {
    pub from: SnapshotId,
    pub to: SnapshotId,
    pub format: Option<String>,
    #[serde(default)]
    pub compare_defaults: bool,
    #[serde(default)]
    pub compare_ordinal_positions: bool,
    #[serde(default)]
    pub compare_table_attributes: bool,
}

impl DiffQuery {
    fn params(&self) -> DiffParams {
        DiffParams {
            format: self.format.clone(),
            compare_defaults: self.compare_defaults,
            compare_ordinal_positions: self.compare_ordinal_positions,
            compare_table_attributes: self.compare_table_attributes,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub success: bool,
    pub diff: SchemaDiff,
}

#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    pub keep: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneResponse {
    pub success: bool,
    pub removed: usize,
    pub kept: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildResponse {
    pub success: bool,
    pub rebuilt: usize,
}

// ==================== Handlers ====================

/// Crawl the configured source database and store the result
pub async fn create_snapshot(State(state): State<SharedState>) -> ApiResult<Json<SnapshotCreatedResponse>> {
    let pool = state
        .source
        .as_ref()
        .ok_or_else(|| AppError::NotConnected("No source database configured".to_string()))?;

    let snapshot = PostgresCrawler::crawl(pool, &state.crawl_schema, &state.filter).await?;
    let table_count = snapshot.table_count();
    let column_count = snapshot.column_count();

    let id = with_store(&state, move |store| store.save(&snapshot)).await?;

    info!(
        "Captured snapshot {} of schema '{}' ({} tables)",
        id, state.crawl_schema, table_count
    );

    Ok(Json(SnapshotCreatedResponse {
        success: true,
        message: format!("Snapshot {} created successfully", id),
        id,
        table_count,
        column_count,
    }))
}

/// List the most recent snapshots, newest first
pub async fn list_snapshots(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SnapshotListResponse>> {
    let limit = query.limit.unwrap_or(0);
    let snapshots = with_store(&state, move |store| store.list_recent(limit)).await?;

    Ok(Json(SnapshotListResponse {
        success: true,
        snapshots,
    }))
}

/// Load one snapshot
pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<SnapshotId>,
) -> ApiResult<Json<SnapshotResponse>> {
    let snapshot = with_store(&state, move |store| store.get(id)).await?;
    let checksum = snapshot.checksum()?;

    Ok(Json(SnapshotResponse {
        success: true,
        id,
        checksum,
        snapshot,
    }))
}

/// Export one snapshot as JSON, CSV or Markdown
pub async fn export_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<SnapshotId>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = parse_format(query.format.as_deref())?;
    let snapshot = with_store(&state, move |store| store.get(id)).await?;
    let body = render_export(&snapshot, format)?;

    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

/// Compare two stored snapshots
pub async fn diff_snapshots(
    State(state): State<SharedState>,
    Query(query): Query<DiffQuery>,
) -> ApiResult<Response> {
    let params = query.params();
    let format = params.format()?;
    let options = params.options();
    let (from, to) = (query.from, query.to);

    let diff = with_store(&state, move |store| DiffEngine::compare_stored(store, from, to, &options)).await?;
    Ok(render_diff(diff, format))
}

/// Compare the two most recent snapshots
pub async fn diff_latest(
    State(state): State<SharedState>,
    Query(params): Query<DiffParams>,
) -> ApiResult<Response> {
    let format = params.format()?;
    let options = params.options();

    let diff = with_store(&state, move |store| DiffEngine::compare_latest(store, &options)).await?;
    Ok(render_diff(diff, format))
}

/// Keep only the newest `keep` snapshots
pub async fn prune_snapshots(
    State(state): State<SharedState>,
    Json(req): Json<PruneRequest>,
) -> ApiResult<Json<PruneResponse>> {
    let keep = req.keep;
    let removed = with_store(&state, move |store| store.prune(keep)).await?;

    Ok(Json(PruneResponse {
        success: true,
        removed,
        kept: keep,
    }))
}

/// Re-derive the relational projection from the stored blobs
pub async fn rebuild_projection(State(state): State<SharedState>) -> ApiResult<Json<RebuildResponse>> {
    let rebuilt = with_store(&state, |store| store.rebuild_projection()).await?;

    Ok(Json(RebuildResponse {
        success: true,
        rebuilt,
    }))
}

// ==================== Helpers ====================

/// Run a store operation on the blocking pool
async fn with_store<T, F>(state: &SharedState, op: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&SnapshotStore) -> crate::snapshot::SnapshotResult<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    let result = tokio::task::spawn_blocking(move || op(store.as_ref())).await?;
    Ok(result?)
}

fn parse_format(raw: Option<&str>) -> ApiResult<ExportFormat> {
    match raw {
        Some(value) => value.parse().map_err(AppError::BadRequest),
        None => Ok(ExportFormat::default()),
    }
}

fn render_diff(diff: SchemaDiff, format: ExportFormat) -> Response {
    match format {
        ExportFormat::Markdown => (
            [(header::CONTENT_TYPE, format.content_type())],
            render_diff_markdown(&diff, Utc::now()),
        )
            .into_response(),
        _ => Json(DiffResponse { success: true, diff }).into_response(),
    }
}
