//! Interface layer - HTTP API, WebSocket delivery, metrics

pub mod api;
