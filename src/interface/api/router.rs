//! API Router configuration

use super::appointments_handler::{get_no_show_state, record_expert_join};
use super::calls_handler::{
    accept_call, cancel_call, decline_call, get_call_request, get_call_state, start_call,
    stop_call, toggle_mute, toggle_video,
};
use super::metrics_handler::metrics_handler;
use super::presence_handler::{
    configure_auto_away, get_presence, get_presence_stats, heartbeat, set_status,
};
use super::websocket::{ws_handler, EventBroadcaster};
use super::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

async fn health_check() -> &'static str {
    "ok"
}

/// Build the API router
pub fn build_router(
    state: AppState,
    prometheus_handle: PrometheusHandle,
    event_broadcaster: Arc<EventBroadcaster>,
) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    // Call signaling routes
    let call_routes = Router::new()
        .route("/calls", post(start_call))
        .route("/calls/:request_id/accept", post(accept_call))
        .route("/calls/:request_id/decline", post(decline_call))
        .route("/calls/stop", post(stop_call))
        .route("/calls/cancel", post(cancel_call))
        .route("/calls/mute", post(toggle_mute))
        .route("/calls/video", post(toggle_video))
        .route("/calls/state", get(get_call_state))
        .route("/calls/requests/:request_id", get(get_call_request));

    // Presence routes
    let presence_routes = Router::new()
        .route("/presence", put(set_status))
        .route("/presence/heartbeat", post(heartbeat))
        .route("/presence/auto-away", put(configure_auto_away))
        .route("/presence/stats", get(get_presence_stats))
        .route("/presence/:expert_id", get(get_presence));

    // Appointment no-show routes
    let appointment_routes = Router::new()
        .route("/appointments/:id/no-show", get(get_no_show_state))
        .route("/appointments/:id/join", post(record_expert_join));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // WebSocket route (separate state)
    let ws_routes = Router::new()
        .route("/ws", get(ws_handler))
        .with_state(event_broadcaster);

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(presence_routes)
        .merge(appointment_routes)
        .with_state(state)
        .merge(metrics_routes)
        .merge(ws_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
