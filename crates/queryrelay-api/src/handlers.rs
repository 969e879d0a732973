//! RPC handlers for the hosting UI. Every
//! verb here is a thin translation of a `Scheduler`/`Executor` public
//! contract method onto an HTTP route — the core never imports `axum`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use queryrelay_core::{Connection, ConnectionId, Job, JobId};
use queryrelay_executor::{QueryRunner, SessionFactory};

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

// ── Jobs ─────────────────────────────────────────────────────────

pub async fn list_jobs<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> Json<Vec<Job>> {
    Json(state.scheduler.get_jobs().await)
}

pub async fn get_job<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .scheduler
        .get_job(&JobId::from(id.clone()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("job {id} not found")))
}

pub async fn create_job<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Json(job): Json<Job>,
) -> ApiResult<impl IntoResponse> {
    let job = state.scheduler.add_job(job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn update_job<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(_id): Path<String>,
    Json(job): Json<Job>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.scheduler.update_job(job).await?))
}

pub async fn delete_job<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_job(&JobId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_job_now<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.run_job_now(&JobId::from(id)).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct RunSubsetRequest {
    pub connection_ids: Vec<String>,
}

pub async fn run_job_for_connections<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
    Json(req): Json<RunSubsetRequest>,
) -> ApiResult<StatusCode> {
    let ids = req.connection_ids.into_iter().map(ConnectionId::from).collect();
    state
        .scheduler
        .run_job_for_connections(&JobId::from(id), ids)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_job_progress<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .scheduler
        .progress()
        .get_progress(&JobId::from(id.clone()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no live progress for job {id}")))
}

pub async fn list_progress<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.progress().list_progress().await)
}

pub async fn cancel_job<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let cancelled = state.scheduler.progress().cancel_job(&JobId::from(id)).await;
    Json(serde_json::json!({ "cancelled": cancelled }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    100
}

pub async fn recent_history<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(state.scheduler.executor().history().recent(q.limit).await)
}

pub async fn job_history<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.scheduler.executor().history().for_job(&JobId::from(id)).await)
}

// ── Connections ──────────────────────────────────────────────────

pub async fn list_connections<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> Json<Vec<Connection>> {
    Json(state.scheduler.get_connections().await)
}

pub async fn get_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Connection>> {
    state
        .scheduler
        .get_connection(&ConnectionId::from(id.clone()))
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("connection {id} not found")))
}

pub async fn create_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Json(connection): Json<Connection>,
) -> ApiResult<impl IntoResponse> {
    let connection = state.scheduler.add_connection(connection).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

pub async fn update_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(_id): Path<String>,
    Json(connection): Json<Connection>,
) -> ApiResult<Json<Connection>> {
    Ok(Json(state.scheduler.update_connection(connection).await?))
}

pub async fn delete_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_connection(&ConnectionId::from(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn duplicate_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let copy = state
        .scheduler
        .duplicate_connection(&ConnectionId::from(id))
        .await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

pub async fn test_connection<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .scheduler
        .test_connection(&ConnectionId::from(id))
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BulkTestRequest {
    pub connection_ids: Vec<String>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

pub async fn bulk_test_connections<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Json(req): Json<BulkTestRequest>,
) -> impl IntoResponse {
    let ids: Vec<ConnectionId> = req.connection_ids.into_iter().map(ConnectionId::from).collect();
    let results = state
        .scheduler
        .bulk_test_connections(&ids, req.max_concurrent)
        .await;
    let body: Vec<_> = results
        .into_iter()
        .map(|(id, outcome)| match outcome {
            Ok(o) => serde_json::json!({ "connectionId": id, "ok": true, "outcome": o }),
            Err(e) => serde_json::json!({ "connectionId": id, "ok": false, "error": e.to_string() }),
        })
        .collect();
    Json(body)
}

// ── Queue / metrics ──────────────────────────────────────────────

pub async fn queue_metrics<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.queue().metrics().await)
}

pub async fn queue_running<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.queue().get_running().await)
}

pub async fn queue_pending<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.queue().get_pending().await)
}

pub async fn pool_metrics<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.executor().pool().metrics().await)
}

// ── Settings / taxonomy ──────────────────────────────────────────

pub async fn get_settings<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
) -> impl IntoResponse {
    Json(state.scheduler.settings().await)
}

// ── Log tail ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    #[serde(default = "default_tail_lines")]
    pub lines: usize,
}

fn default_tail_lines() -> usize {
    200
}

pub async fn tail_log<F: SessionFactory, Q: QueryRunner>(
    State(state): State<ApiState<F, Q>>,
    Query(q): Query<TailQuery>,
) -> ApiResult<impl IntoResponse> {
    let lines = state.logger.tail(q.lines).await?;
    Ok(Json(lines))
}
