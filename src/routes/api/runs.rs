use axum::Json;
use axum::extract::{Path, State};
use uuid::Uuid;

use crate::error::AppError;
use crate::import::StatusReport;
use crate::models::run::LogEntry;
use crate::routes::AppState;

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusReport>, AppError> {
    let report = state.orchestrator.get_status(id).await?;
    Ok(Json(report))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancelled = state.orchestrator.cancel(id).await?;
    Ok(Json(serde_json::json!({
        "run_id": id,
        "cancelled": cancelled,
    })))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    let recorder = state.orchestrator.recorder();
    if recorder.get_run(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Run {id} not found")));
    }
    let entries = recorder.logs(id).await?;
    Ok(Json(entries))
}
