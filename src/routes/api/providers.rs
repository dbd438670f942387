use axum::Json;
use axum::extract::{Path, State};

use crate::error::AppError;
use crate::providers::{ConnectionCheck, ProviderInfo};
use crate::routes::AppState;

pub async fn list(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let providers = state
        .orchestrator
        .registry()
        .list()
        .iter()
        .map(|p| ProviderInfo::of(p.as_ref()))
        .collect();
    Json(providers)
}

pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionCheck>, AppError> {
    let check = state.orchestrator.test_provider(&id).await?;
    Ok(Json(check))
}

/// POST /api/v1/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.cache().map(|c| c.clear()).unwrap_or(0);
    tracing::info!("Response cache cleared ({cleared} entries)");
    Json(serde_json::json!({
        "enabled": state.cache().is_some(),
        "cleared": cleared,
    }))
}
