//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Proposal outcomes and rejections
//! - Divorces
//! - Actors currently engaged in a pending proposal
//! - Bus traffic and handler failures
//! - Global command replays

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Proposal metrics
    pub static ref PROPOSALS: CounterVec = register_counter_vec!(
        "kinship_proposals_total",
        "Proposals that passed validation, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref PROPOSALS_REJECTED: CounterVec = register_counter_vec!(
        "kinship_proposals_rejected_total",
        "Proposals refused during validation, by reason",
        &["reason"]
    ).unwrap();

    pub static ref ENGAGED_ACTORS: IntGauge = register_int_gauge!(
        "kinship_engaged_actors",
        "Actors currently held by a pending proposal"
    ).unwrap();

    pub static ref DIVORCES: IntCounter = register_int_counter!(
        "kinship_divorces_total",
        "Total divorces processed"
    ).unwrap();

    // Bus metrics
    pub static ref BUS_MESSAGES: CounterVec = register_counter_vec!(
        "kinship_bus_messages_total",
        "Messages received from the bus",
        &["channel"]
    ).unwrap();

    pub static ref HANDLER_FAILURES: CounterVec = register_counter_vec!(
        "kinship_handler_failures_total",
        "Bus messages whose handler failed",
        &["channel"]
    ).unwrap();

    pub static ref GLOBAL_COMMANDS: CounterVec = register_counter_vec!(
        "kinship_global_commands_total",
        "Global commands replayed, by guild ownership",
        &["ownership"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: IntCounter = register_int_counter!(
        "kinship_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: IntCounter = register_int_counter!(
        "kinship_health_check_failure_total",
        "Total failed health checks"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> (StatusCode, String) {
    match render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

/// Text exposition of the default registry
pub fn render() -> RelayerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| RelayerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_proposal(outcome: &str) {
    PROPOSALS.with_label_values(&[outcome]).inc();
}

pub fn record_proposal_rejected(reason: &str) {
    PROPOSALS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn set_engaged_actors(count: usize) {
    ENGAGED_ACTORS.set(count as i64);
}

pub fn record_divorce() {
    DIVORCES.inc();
}

pub fn record_bus_message(channel: &str) {
    BUS_MESSAGES.with_label_values(&[channel]).inc();
}

pub fn record_handler_failure(channel: &str) {
    HANDLER_FAILURES.with_label_values(&[channel]).inc();
}

pub fn record_global_command(ownership: &str) {
    GLOBAL_COMMANDS.with_label_values(&[ownership]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}
