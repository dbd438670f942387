use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vacancy_importer::client::{ClientFactory, ResponseCache};
use vacancy_importer::config::{Command, Config};
use vacancy_importer::db;
use vacancy_importer::import::Orchestrator;
use vacancy_importer::models::run::TriggerType;
use vacancy_importer::providers::find_apprenticeship::FindApprenticeship;
use vacancy_importer::providers::registry::ProviderRegistry;
use vacancy_importer::routes::{self, AppState};
use vacancy_importer::scheduler::Scheduler;
use vacancy_importer::store::{PgRecords, PgRuns, PgTasks, RunRecorder};

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(pool: PgPool) -> impl IntoResponse {
    let result: Result<(i32,), _> = sqlx::query_as("SELECT 1").fetch_one(&pool).await;
    match result {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vacancy_importer=info,tower_http=info"));
    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn load_provider_configs(path: &Path) -> anyhow::Result<BTreeMap<String, serde_json::Value>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading provider config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing provider config {}", path.display()))
}

async fn shutdown_signal(token: CancellationToken, orchestrator: Arc<Orchestrator>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Received ctrl-c, shutting down...");
    let cancelled = orchestrator.cancel_all();
    if cancelled > 0 {
        tracing::info!("Cancelled {cancelled} active runs");
    }
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_format);

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    if config.run_migrations {
        tracing::info!("Running database migrations...");
        db::run_migrations(&pool).await?;
        tracing::info!("Migrations complete");
    }

    let cache = config.engine.cache_ttl().map(|ttl| Arc::new(ResponseCache::new(ttl)));
    let clients = ClientFactory::new(config.engine.http_settings(), cache)?;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FindApprenticeship::new(clients.clone())));
    if let Some(path) = &config.providers_config {
        let configs = load_provider_configs(path).await?;
        let configured = registry.load_configs(&configs);
        tracing::info!("Configured {configured} providers from {}", path.display());
    }

    let recorder = Arc::new(PgRuns::new(pool.clone()));
    let recovered = recorder.recover_stale().await?;
    if recovered > 0 {
        tracing::warn!("Marked {recovered} interrupted runs as failed");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        clients,
        Arc::new(PgTasks::new(pool.clone())),
        Arc::new(PgRecords::new(pool.clone())),
        recorder,
        config.engine.import_settings(),
    ));

    match config.resolved_command() {
        Command::Serve {
            listen_addr,
            scheduler_tick,
        } => {
            let shutdown = CancellationToken::new();
            let scheduler = Scheduler::new(orchestrator.clone(), Duration::from_secs(scheduler_tick));
            let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

            let readyz_pool = pool.clone();
            let app = Router::new()
                .route("/healthz", get(healthz))
                .route("/readyz", get(move || readyz(readyz_pool.clone())))
                .merge(routes::api::router(AppState::new(orchestrator.clone())))
                .layer(
                    ServiceBuilder::new()
                        .layer(TraceLayer::new_for_http())
                        .layer(CorsLayer::permissive()),
                );

            let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
            tracing::info!("Listening on {listen_addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown.clone(), orchestrator))
                .await?;

            shutdown.cancel();
            let _ = scheduler_handle.await;
        }
        Command::Run { task } => {
            let run = orchestrator.run_import(task, TriggerType::Manual);
            tokio::pin!(run);
            let finished = tokio::select! {
                summary = &mut run => Some(summary),
                _ = tokio::signal::ctrl_c() => None,
            };
            let summary = match finished {
                Some(summary) => summary?,
                None => {
                    tracing::info!("Received ctrl-c, cancelling run...");
                    orchestrator.cancel_all();
                    // The run observes cancellation and finalizes itself.
                    run.await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                std::process::exit(1);
            }
        }
        Command::Schedule { scheduler_tick } => {
            let shutdown = CancellationToken::new();
            let scheduler = Scheduler::new(orchestrator.clone(), Duration::from_secs(scheduler_tick));
            let handle = tokio::spawn(scheduler.run(shutdown.clone()));
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received ctrl-c, shutting down...");
            orchestrator.cancel_all();
            shutdown.cancel();
            let _ = handle.await;
        }
    }

    Ok(())
}
