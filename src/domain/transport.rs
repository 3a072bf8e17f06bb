//! Media transport collaborator port
//!
//! The media engine is a black-box SDK: join/leave/track-toggle by channel
//! name + token, plus participant events. Nothing in this crate touches
//! codecs or media quality.

use crate::domain::call::session::SessionCredentials;
use crate::domain::shared::value_objects::{CallType, SessionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("transport timed out: {0}")]
    Timeout(String),

    #[error("not connected to channel {0}")]
    NotConnected(String),
}

/// Which local/remote track a transport operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Handles to the local media tracks returned by a successful join
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTracks {
    pub audio_track: Option<String>,
    pub video_track: Option<String>,
}

/// Remote-participant events pushed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ParticipantPublished {
        channel_name: String,
        participant_id: String,
        kind: TrackKind,
    },
    ParticipantUnpublished {
        channel_name: String,
        participant_id: String,
        kind: TrackKind,
    },
    ParticipantLeft {
        channel_name: String,
        participant_id: String,
    },
}

/// Black-box media transport SDK surface
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn join(
        &self,
        credentials: &SessionCredentials,
        call_type: CallType,
    ) -> std::result::Result<LocalTracks, TransportError>;

    async fn leave(&self, channel_name: &str) -> std::result::Result<(), TransportError>;

    /// Enable/disable a local track. Disabling an already-disabled track is
    /// a no-op on the transport side.
    async fn set_track_enabled(
        &self,
        channel_name: &str,
        kind: TrackKind,
        enabled: bool,
    ) -> std::result::Result<(), TransportError>;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Mints single-use session credentials. Implemented in infrastructure
/// with an HMAC-signed token; sessions never share or reissue credentials.
pub trait CredentialIssuer: Send + Sync {
    fn issue(&self, session_id: SessionId) -> SessionCredentials;
}
