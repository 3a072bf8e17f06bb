//! HTTP/WebSocket interface

pub mod appointments_handler;
pub mod auth;
pub mod calls_handler;
pub mod dto;
pub mod metrics_handler;
pub mod presence_handler;
pub mod router;
pub mod websocket;

use crate::application::no_show::NoShowMonitor;
use crate::application::signaling::CallSignalingCoordinator;
use crate::domain::call::ledger::SessionLedger;
use crate::domain::presence::PresenceTracker;
use std::sync::Arc;
use websocket::EventBroadcaster;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<CallSignalingCoordinator>,
    pub presence: Arc<PresenceTracker>,
    pub monitor: Arc<NoShowMonitor>,
    pub ledger: Arc<dyn SessionLedger>,
    pub broadcaster: Arc<EventBroadcaster>,
}

pub use metrics_handler::{init_metrics, update_active_calls, update_pending_requests};
pub use router::build_router;
