use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, SyncError};
use crate::import::RunSummary;
use crate::models::run::{ImportRun, TriggerType};
use crate::models::task::{ImportTask, TaskStatus};
use crate::providers::ConnectionCheck;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

/// Drafts may be incomplete; anything else has to be runnable.
fn check(task: &ImportTask) -> Result<(), AppError> {
    if task.name.trim().is_empty() {
        return Err(AppError::BadRequest("Task name is required".to_string()));
    }
    if task.status != TaskStatus::Draft {
        task.validate().map_err(|e| AppError::BadRequest(e.to_string()))?;
    }
    Ok(())
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ImportTask>>, AppError> {
    let tasks = state.orchestrator.tasks().list().await?;
    Ok(Json(tasks))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportTask>, AppError> {
    let task = state
        .orchestrator
        .tasks()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Task {id} not found")))?;
    Ok(Json(task))
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<ImportTask>,
) -> Result<(StatusCode, Json<ImportTask>), AppError> {
    check(&input)?;
    let task = state.orchestrator.tasks().create(input).await?;
    tracing::info!("Created task '{}' ({})", task.name, task.id);
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ImportTask>,
) -> Result<Json<ImportTask>, AppError> {
    check(&input)?;
    let task = state.orchestrator.tasks().update(id, input).await?;
    Ok(Json(task))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.orchestrator.is_running(id) {
        return Err(SyncError::AlreadyRunning(id).into());
    }
    if !state.orchestrator.tasks().delete(id).await? {
        return Err(AppError::NotFound(format!("Task {id} not found")));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConnectionCheck>, AppError> {
    let check = state.orchestrator.test_task(id).await?;
    Ok(Json(check))
}

/// POST /api/v1/tasks/{id}/run
///
/// Runs the import synchronously and returns the final summary. A task that
/// already has an active run answers 409.
pub async fn run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunSummary>, AppError> {
    let summary = state.orchestrator.run_import(id, TriggerType::Manual).await?;
    Ok(Json(summary))
}

pub async fn runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<ImportRun>>, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.orchestrator.recorder().recent_runs(id, limit).await?;
    Ok(Json(runs))
}
