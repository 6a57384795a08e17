//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Destination chain connection status
//! - Settlement signing, broadcast and confirmation
//! - Operator recovery actions

use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "swap_relayer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref SWAPS_REGISTERED: CounterVec = register_counter_vec!(
        "swap_relayer_swaps_registered_total",
        "Verified swaps handed over for settlement",
        &["chain_id", "status"]
    ).unwrap();

    pub static ref SWAPS_SIGNED: CounterVec = register_counter_vec!(
        "swap_relayer_swaps_signed_total",
        "Settlement transactions signed",
        &["chain_id"]
    ).unwrap();

    pub static ref SWAPS_SENT: CounterVec = register_counter_vec!(
        "swap_relayer_swaps_sent_total",
        "Settlement transactions accepted by the destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "swap_relayer_swaps_failed_total",
        "Swaps marked failed after exhausting broadcast attempts",
        &["chain_id"]
    ).unwrap();

    pub static ref RESULTS_STABLE: CounterVec = register_counter_vec!(
        "swap_relayer_results_stable_total",
        "Settlements confirmed on the destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref RESULTS_FAILED: CounterVec = register_counter_vec!(
        "swap_relayer_results_failed_total",
        "Settlements reverted on the destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: HistogramVec = register_histogram_vec!(
        "swap_relayer_settlement_latency_seconds",
        "Time from source deposit to stable settlement",
        &["chain_id"],
        vec![30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    pub static ref ADMIN_ACTIONS: CounterVec = register_counter_vec!(
        "swap_relayer_admin_actions_total",
        "Operator recovery actions by outcome",
        &["action", "outcome"]
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
            .map_err(|e| RelayerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: &str, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[chain_id])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_swap_registered(chain_id: &str, status: &str) {
    SWAPS_REGISTERED.with_label_values(&[chain_id, status]).inc();
}

pub fn record_swap_signed(chain_id: &str) {
    SWAPS_SIGNED.with_label_values(&[chain_id]).inc();
}

pub fn record_swap_sent(chain_id: &str) {
    SWAPS_SENT.with_label_values(&[chain_id]).inc();
}

pub fn record_swap_failed(chain_id: &str) {
    SWAPS_FAILED.with_label_values(&[chain_id]).inc();
}

pub fn record_result_stable(chain_id: &str, latency_secs: f64) {
    RESULTS_STABLE.with_label_values(&[chain_id]).inc();
    SETTLEMENT_LATENCY
        .with_label_values(&[chain_id])
        .observe(latency_secs);
}

pub fn record_result_failed(chain_id: &str) {
    RESULTS_FAILED.with_label_values(&[chain_id]).inc();
}

pub fn record_admin_action(action: &str, accepted: bool) {
    let outcome = if accepted { "accepted" } else { "rejected" };
    ADMIN_ACTIONS.with_label_values(&[action, outcome]).inc();
}
