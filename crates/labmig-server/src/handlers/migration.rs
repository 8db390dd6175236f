//! Migration job control endpoints under `/api/migration`.

use super::OptionsRequest;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use labmig_core::config::ServiceConfig;
use labmig_core::{
    MigrationError, MigrationProgress, MigrationResult, MigrationStatisticsSummary,
    MigrationStatusSummary,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub level: Option<String>,
}

/// Unparseable ids are reported the same way as unknown ones.
fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ApiError(MigrationError::not_found(format!("Migration {}", id))))
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    request: Option<Json<OptionsRequest>>,
) -> ApiResult<Json<MigrationStatusSummary>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let options = request.resolve(&state.base_options)?;
    let summary = state.service.start_migration(options)?;
    info!(migration_id = %summary.migration_id, "Migration started via API");
    Ok(Json(summary))
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<MigrationStatusSummary> {
    Json(state.service.get_status())
}

pub async fn running(State(state): State<Arc<AppState>>) -> Json<bool> {
    Json(state.service.is_migration_running())
}

pub async fn progress(State(state): State<Arc<AppState>>) -> ApiResult<Json<MigrationProgress>> {
    Ok(Json(state.service.get_progress()?))
}

pub async fn cancel(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    if !state.service.cancel_migration() {
        return Err(ApiError::bad_request("No migration is currently running"));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Cancellation requested"
    })))
}

pub async fn pause(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.service.pause_migration()?;
    Ok(Json(json!({
        "success": true,
        "message": "Migration paused"
    })))
}

pub async fn resume(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.service.resume_migration()?;
    Ok(Json(json!({
        "success": true,
        "message": "Migration resumed"
    })))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<MigrationStatusSummary>> {
    let limit = query.limit.unwrap_or(ServiceConfig::DEFAULT_HISTORY_LIMIT);
    let history = state
        .service
        .migration_history(limit)
        .iter()
        .map(MigrationStatusSummary::from)
        .collect();
    Json(history)
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatisticsQuery>,
) -> Json<MigrationStatisticsSummary> {
    let days = query.days.unwrap_or(ServiceConfig::DEFAULT_STATISTICS_DAYS);
    Json(state.service.migration_statistics(days))
}

pub async fn get_migration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<MigrationResult>> {
    let id = parse_id(&id)?;
    Ok(Json(state.service.get_migration(id)?))
}

pub async fn report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    let format = query.format.unwrap_or_else(|| "json".to_string());
    // Reject the format before looking up the run.
    format.parse::<labmig_core::ReportFormat>()?;
    let id = parse_id(&id)?;
    let report = state.service.generate_report(id, &format)?;
    let disposition = format!("attachment; filename=\"{}\"", report.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, report.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.content,
    )
        .into_response())
}

pub async fn logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Response> {
    let id = parse_id(&id)?;
    let level = query.level.unwrap_or_else(|| "all".to_string());
    let logs = state.service.migration_logs(id, &level)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string())],
        logs,
    )
        .into_response())
}
