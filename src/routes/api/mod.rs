pub mod providers;
pub mod runs;
pub mod tasks;

use axum::Router;
use axum::routing::{get, post};

use crate::routes::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Providers
        .route("/providers", get(providers::list))
        .route("/providers/{id}/test", post(providers::test))
        // Tasks
        .route("/tasks", get(tasks::list).post(tasks::create))
        .route(
            "/tasks/{id}",
            get(tasks::get).put(tasks::update).delete(tasks::delete),
        )
        .route("/tasks/{id}/test", post(tasks::test))
        .route("/tasks/{id}/run", post(tasks::run))
        .route("/tasks/{id}/runs", get(tasks::runs))
        // Runs
        .route("/runs/{id}", get(runs::status))
        .route("/runs/{id}/cancel", post(runs::cancel))
        .route("/runs/{id}/logs", get(runs::logs))
        // Cache
        .route("/cache/clear", post(providers::clear_cache))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}
