//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Session lifecycle
//! - Swap outcomes and duration
//! - Handoff progress
//! - Supply dispatches
//! - Flow events and rejected commands

use crate::error::OrchestratorResult;
use crate::events::FlowEvent;
use crate::position::SourceField;
use crate::transfer::SwapStatus;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Session metrics
    pub static ref SESSIONS_OPENED: CounterVec = register_counter_vec!(
        "lendflow_sessions_opened_total",
        "Total supply sessions opened",
        &[]
    ).unwrap();

    pub static ref SESSIONS_CLOSED: CounterVec = register_counter_vec!(
        "lendflow_sessions_closed_total",
        "Total supply sessions closed",
        &[]
    ).unwrap();

    pub static ref SESSIONS_ACTIVE: GaugeVec = register_gauge_vec!(
        "lendflow_sessions_active",
        "Currently open sessions",
        &[]
    ).unwrap();

    // Flow metrics
    pub static ref FLOW_EVENTS: CounterVec = register_counter_vec!(
        "lendflow_flow_events_total",
        "Flow events applied by type",
        &["event"]
    ).unwrap();

    pub static ref COMMANDS_REJECTED: CounterVec = register_counter_vec!(
        "lendflow_commands_rejected_total",
        "Caller commands rejected by the state machine",
        &["state", "event"]
    ).unwrap();

    // Swap metrics
    pub static ref SWAPS_INITIATED: CounterVec = register_counter_vec!(
        "lendflow_swaps_initiated_total",
        "Total cross-chain swaps initiated",
        &["dest_chain"]
    ).unwrap();

    pub static ref SWAPS_COMPLETED: CounterVec = register_counter_vec!(
        "lendflow_swaps_completed_total",
        "Total swaps that delivered funds",
        &["dest_chain"]
    ).unwrap();

    pub static ref SWAPS_FAILED: CounterVec = register_counter_vec!(
        "lendflow_swaps_failed_total",
        "Total swaps that failed or were refunded",
        &["dest_chain", "status"]
    ).unwrap();

    pub static ref SWAP_DURATION: HistogramVec = register_histogram_vec!(
        "lendflow_swap_duration_seconds",
        "Time from initiation to terminal swap status",
        &["dest_chain"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    ).unwrap();

    // Handoff metrics
    pub static ref HANDOFF_STEPS: CounterVec = register_counter_vec!(
        "lendflow_handoff_steps_total",
        "Source fields written during swap handoff",
        &["field"]
    ).unwrap();

    // Supply metrics
    pub static ref SUPPLIES_DISPATCHED: CounterVec = register_counter_vec!(
        "lendflow_supplies_dispatched_total",
        "Total supply requests handed to the planner",
        &["chain_id"]
    ).unwrap();

    pub static ref SUPPLY_FAILURES: CounterVec = register_counter_vec!(
        "lendflow_supply_failures_total",
        "Total supply dispatches the planner rejected",
        &["chain_id"]
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

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

// Helper functions to record metrics

pub fn record_session_opened() {
    SESSIONS_OPENED.with_label_values(&[]).inc();
}

pub fn record_session_closed() {
    SESSIONS_CLOSED.with_label_values(&[]).inc();
}

pub fn set_active_sessions(count: usize) {
    SESSIONS_ACTIVE.with_label_values(&[]).set(count as f64);
}

pub fn record_flow_event(event: &FlowEvent) {
    FLOW_EVENTS.with_label_values(&[event.name()]).inc();
}

pub fn record_command_rejected(state: &str, event: &str) {
    COMMANDS_REJECTED.with_label_values(&[state, event]).inc();
}

pub fn record_swap_initiated(dest_chain: u64) {
    SWAPS_INITIATED
        .with_label_values(&[&dest_chain.to_string()])
        .inc();
}

pub fn record_swap_completed(dest_chain: u64) {
    SWAPS_COMPLETED
        .with_label_values(&[&dest_chain.to_string()])
        .inc();
}

pub fn record_swap_failed(dest_chain: u64, status: SwapStatus) {
    SWAPS_FAILED
        .with_label_values(&[&dest_chain.to_string(), status.as_str()])
        .inc();
}

pub fn record_swap_duration(dest_chain: u64, duration_secs: f64) {
    SWAP_DURATION
        .with_label_values(&[&dest_chain.to_string()])
        .observe(duration_secs);
}

pub fn record_handoff_step(field: SourceField) {
    HANDOFF_STEPS.with_label_values(&[field.name()]).inc();
}

pub fn record_supply_dispatched(chain_id: u64) {
    SUPPLIES_DISPATCHED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_supply_failure(chain_id: u64) {
    SUPPLY_FAILURES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}
