//! Prometheus metrics handler

use axum::extract::State;
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("metrics recorder installs once at startup");

    describe_gauge!("call_active_sessions", "Calls currently in progress");
    describe_gauge!(
        "call_pending_requests",
        "Call requests still waiting for an answer"
    );
    describe_counter!(
        "no_show_cancellations",
        "Appointments cancelled for expert no-show"
    );
    describe_counter!(
        "settlement_jobs_completed",
        "Settlement jobs (debits and refunds) that completed"
    );
    describe_counter!(
        "settlement_jobs_exhausted",
        "Settlement jobs dropped after exhausting retries"
    );

    handle
}

pub fn update_active_calls(count: usize) {
    gauge!("call_active_sessions").set(count as f64);
}

pub fn update_pending_requests(count: usize) {
    gauge!("call_pending_requests").set(count as f64);
}

/// Render the Prometheus exposition text
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
