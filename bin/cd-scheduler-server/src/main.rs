//! Campaign Dispatch Scheduler Server
//!
//! Runs the campaign orchestrator against a SQLite or PostgreSQL dispatch
//! store and exposes health and Prometheus endpoints.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DISPATCH_CONFIG` | - | Path to a TOML config file |
//! | `DISPATCH_DATABASE_URL` | `sqlite://./data/dispatch.db?mode=rwc` | `sqlite://` or `postgres://` URL |
//! | `DISPATCH_GATEWAY_URL` | `http://localhost:3000` | Delivery gateway base URL |
//! | `DISPATCH_MAX_CONCURRENT_CAMPAIGNS` | `0` | Campaign loop ceiling, 0 = unlimited |
//! | `DISPATCH_STUCK_TTL_MS` | `1800000` | Age after which processing rows are revived |
//! | `DISPATCH_TICK_INTERVAL_MS` | `3000` | Orchestrator tick interval |
//! | `DISPATCH_HTTP_PORT` | `8080` | Health/metrics port |
//!
//! See `cd_config::ConfigLoader` for the full list.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use cd_config::{AppConfig, DatabaseConfig};
use cd_scheduler::postgres::PostgresDispatchStore;
use cd_scheduler::sqlite::SqliteDispatchStore;
use cd_scheduler::{DeliveryGateway, DispatchStore, HttpGateway, HttpGatewayConfig, Orchestrator, SchedulerConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tracing::info;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    metrics: PrometheusHandle,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    scheduler_running: bool,
    tick_count: u64,
    running_campaigns: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    cd_common::logging::init_logging("cd-scheduler-server");

    info!("Starting Campaign Dispatch Scheduler");

    let config = AppConfig::load()?;
    info!(
        enabled = config.scheduler.enabled,
        tick_interval_ms = config.scheduler.tick_interval_ms,
        max_concurrent_campaigns = config.scheduler.max_concurrent_campaigns,
        gateway = %config.gateway.base_url,
        "Scheduler configuration loaded"
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let store = create_store(&config.database).await?;
    let gateway: Arc<dyn DeliveryGateway> = Arc::new(HttpGateway::new(HttpGatewayConfig::from(&config.gateway))?);

    let orchestrator = Arc::new(Orchestrator::new(
        SchedulerConfig::from(&config.scheduler),
        store,
        gateway,
    ));
    orchestrator.start().await;

    let app = Router::new()
        .route("/q/health", get(health_handler))
        .route("/q/health/live", get(|| async { Json(serde_json::json!({"status": "UP"})) }))
        .route("/q/health/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(AppState {
            orchestrator: orchestrator.clone(),
            metrics,
        });

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    info!(?addr, "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    info!("Scheduler server stopped");
    Ok(())
}

async fn create_store(config: &DatabaseConfig) -> Result<Arc<dyn DispatchStore>> {
    if config.is_postgres() {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let store = PostgresDispatchStore::new(pool);
        store.init_schema().await?;
        info!("Using PostgreSQL dispatch store");
        Ok(Arc::new(store))
    } else {
        ensure_sqlite_dir(&config.url)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        let store = SqliteDispatchStore::new(pool);
        store.init_schema().await?;
        info!(url = %config.url, "Using SQLite dispatch store");
        Ok(Arc::new(store))
    }
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_sqlite_dir(url: &str) -> Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let running = state.orchestrator.is_running().await;
    Json(HealthResponse {
        status: if running { "UP" } else { "DOWN" },
        scheduler_running: running,
        tick_count: state.orchestrator.tick_count(),
        running_campaigns: state.orchestrator.running_campaigns(),
    })
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.orchestrator.is_ready().await {
        (StatusCode::OK, Json(serde_json::json!({"status": "UP"})))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"status": "DOWN"})))
    }
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

async fn shutdown_signal(orchestrator: Arc<Orchestrator>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(running_campaigns = orchestrator.running_campaigns().len(), "Shutdown signal received");
    orchestrator.stop().await;
}
