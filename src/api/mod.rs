//! HTTP API for health checks, status, and global command injection

use crate::bus::{EventBus, RunGlobalCommand, RUN_GLOBAL_COMMAND};
use crate::config::{ApiConfig, RelayerConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::relationship::ProposalCoordinator;
use crate::state::StateManager;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub state_manager: Arc<StateManager>,
    pub bus: Arc<EventBus>,
    pub coordinator: Arc<ProposalCoordinator>,
    pub relayer: RelayerConfig,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/stats", get(get_stats))
        .route("/global-commands", post(publish_global_command))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RelayerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - database reachable and bus loops running
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.state_manager.health_check().await.is_ok();
    let channels = state.bus.channels();
    let ready = database && !channels.is_empty();

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            channels,
        }),
    )
}

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut channels = state.bus.channels();
    channels.sort();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.relayer.instance_id.clone(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        shard_ids: state.relayer.shard_ids.clone(),
        shard_count: state.relayer.shard_count,
        channels,
        engaged_actors: state.coordinator.exclusivity().len(),
    })
}

/// Marriage and event counts
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.state_manager.get_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            warn!("Failed to load stats: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

/// Publish a command for every shard to replay
async fn publish_global_command(
    State(state): State<AppState>,
    Json(command): Json<RunGlobalCommand>,
) -> impl IntoResponse {
    match state.bus.publish(RUN_GLOBAL_COMMAND, &command).await {
        Ok(()) => {
            info!(
                "Published global command for guild {} message {}",
                command.guild_id, command.message_id
            );
            (StatusCode::ACCEPTED, Json(command)).into_response()
        }
        Err(e) => {
            warn!("Failed to publish global command: {}", e);
            error_response(StatusCode::BAD_GATEWAY, &e)
        }
    }
}

fn error_response(status: StatusCode, e: &RelayerError) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    channels: Vec<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance_id: String,
    uptime_seconds: u64,
    shard_ids: Vec<u32>,
    shard_count: u32,
    channels: Vec<String>,
    engaged_actors: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
