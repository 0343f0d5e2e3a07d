//! API route definitions.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use super::ApiError;
use crate::artifacts::ArtifactSource;
use crate::inference::LogKind;
use crate::reconcile;
use crate::registry::{Backend, Batch};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/runs", get(list_runs))
        .route("/runs/{run}", get(get_run))
        .route("/runs/{run}/tasks/{task}", get(get_task))
        .route("/runs/{run}/tasks/{task}/logs/{kind}", get(get_log))
        .route("/batches", get(list_batches).post(register_batch))
        .route("/batches/{id}", get(get_batch).delete(remove_batch))
        .route("/batches/{id}/status", get(batch_status))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn list_runs(State(state): State<AppState>) -> Json<Value> {
    // An unreadable runs directory is an empty dashboard, not an outage.
    match reconcile::list_runs(state.runs.as_ref(), &state.rules).await {
        Ok(runs) => Json(json!({ "data": runs, "meta": { "total": runs.len() } })),
        Err(e) => {
            tracing::warn!(error = %e, "cannot list runs");
            Json(json!({ "data": [], "meta": { "total": 0, "message": e.to_string() } }))
        }
    }
}

async fn get_run(
    State(state): State<AppState>,
    Path(run): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = reconcile::reconcile_run(state.runs.as_ref(), &run, &state.rules).await?;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}

async fn get_task(
    State(state): State<AppState>,
    Path((run, task)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let report = reconcile::reconcile_task(state.runs.as_ref(), &run, &task, &state.rules).await?;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}

async fn get_log(
    State(state): State<AppState>,
    Path((run, task, kind)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind: LogKind = kind.parse().map_err(ApiError::BadRequest)?;
    let text = state
        .runs
        .artifact_text(&run, &task, kind)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no {:?} artifact for {}/{}", kind, run, task)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

async fn list_batches(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let batches = state.registry.list()?;
    Ok(Json(json!({ "data": batches, "meta": { "total": batches.len() } })))
}

#[derive(Debug, Deserialize)]
struct RegisterBatch {
    id: String,
    backend: Backend,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    note: Option<String>,
}

async fn register_batch(
    State(state): State<AppState>,
    Json(req): Json<RegisterBatch>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut batch = Batch::new(req.id, req.backend, req.tasks);
    batch.note = req.note;
    state.registry.register(&batch)?;
    let stored = state.registry.get(&batch.id)?;
    Ok((StatusCode::CREATED, Json(json!({ "data": stored, "meta": meta() }))))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let batch = state.registry.get(&id)?;
    Ok(Json(json!({ "data": batch, "meta": meta() })))
}

async fn remove_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn batch_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let batch = state.registry.get(&id)?;
    let source = state
        .bucket
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("no bucket source configured".to_string()))?;
    let report = reconcile::reconcile_batch(source.as_ref(), &batch, &state.rules).await?;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}
