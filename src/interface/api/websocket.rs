//! WebSocket signal delivery
//!
//! Realtime delivery path for call signaling and presence changes. Each
//! client connects with its user id; events addressed to that id (or
//! broadcast to everyone) are pushed as JSON.

use crate::domain::notification::{NotificationKind, Notifier};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events pushed to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalEvent {
    /// A call-signaling notification addressed to one party
    Signal {
        kind: String,
        payload: serde_json::Value,
        timestamp: i64,
    },
    /// An expert's presence record changed
    PresenceChanged {
        expert_id: Uuid,
        status: String,
        timestamp: i64,
    },
}

/// Broadcast wrapper: `recipient = None` goes to every client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub recipient: Option<Uuid>,
    pub event: SignalEvent,
}

/// Event broadcaster
pub struct EventBroadcaster {
    tx: broadcast::Sender<SignalEnvelope>,
}

impl EventBroadcaster {
    /// Create new event broadcaster with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEnvelope> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, envelope: SignalEnvelope) {
        // No connected clients is normal
        let _ = self.tx.send(envelope);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn presence_changed(&self, expert_id: Uuid, status: &str) {
        self.broadcast(SignalEnvelope {
            recipient: None,
            event: SignalEvent::PresenceChanged {
                expert_id,
                status: status.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            },
        });
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Notifier adapter: collaborator notifications ride the same socket
pub struct WsNotifier {
    broadcaster: Arc<EventBroadcaster>,
}

impl WsNotifier {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl Notifier for WsNotifier {
    async fn notify(&self, recipient: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        self.broadcaster.broadcast(SignalEnvelope {
            recipient: Some(recipient),
            event: SignalEvent::Signal {
                kind: kind.as_str().to_string(),
                payload,
                timestamp: chrono::Utc::now().timestamp(),
            },
        });
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Uuid,
}

/// WebSocket handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(broadcaster): State<Arc<EventBroadcaster>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster, query.user_id))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, broadcaster: Arc<EventBroadcaster>, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = broadcaster.subscribe();

    info!(%user_id, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.recipient.is_some() && envelope.recipient != Some(user_id) {
                        continue;
                    }
                    match serde_json::to_string(&envelope.event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json)).await.is_err() {
                                debug!("Failed to send event to WebSocket client");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!("Received text message: {}", text);
                }
                Message::Ping(_) => {
                    debug!("Received ping");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears the other down
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!(%user_id, "WebSocket client disconnected");
}
