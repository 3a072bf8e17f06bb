//! Loopback media transport
//!
//! Stands in for the real media SDK in tests and local development: joins
//! always succeed (unless told to fail), track toggles are recorded, and
//! participant events can be injected by hand.

use crate::domain::call::session::SessionCredentials;
use crate::domain::shared::value_objects::CallType;
use crate::domain::transport::{
    LocalTracks, MediaTransport, TrackKind, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

pub struct LoopbackTransport {
    joins: Mutex<HashMap<String, u32>>,
    track_states: Mutex<HashMap<(String, TrackKind), bool>>,
    events: broadcast::Sender<TransportEvent>,
    join_fails: AtomicBool,
    leave_fails: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            joins: Mutex::new(HashMap::new()),
            track_states: Mutex::new(HashMap::new()),
            events,
            join_fails: AtomicBool::new(false),
            leave_fails: AtomicBool::new(false),
        }
    }

    /// Inject a participant event as if pushed by the SDK
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn fail_join(&self, fail: bool) {
        self.join_fails.store(fail, Ordering::SeqCst);
    }

    pub fn fail_leave(&self, fail: bool) {
        self.leave_fails.store(fail, Ordering::SeqCst);
    }

    pub fn join_count(&self, channel_name: &str) -> u32 {
        self.joins
            .lock()
            .unwrap()
            .get(channel_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn join_count_total(&self) -> u32 {
        self.joins.lock().unwrap().values().sum()
    }

    pub fn track_enabled(&self, channel_name: &str, kind: TrackKind) -> Option<bool> {
        self.track_states
            .lock()
            .unwrap()
            .get(&(channel_name.to_string(), kind))
            .copied()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn join(
        &self,
        credentials: &SessionCredentials,
        call_type: CallType,
    ) -> std::result::Result<LocalTracks, TransportError> {
        if self.join_fails.load(Ordering::SeqCst) {
            return Err(TransportError::JoinRejected(
                "loopback configured to reject joins".to_string(),
            ));
        }

        let mut joins = self.joins.lock().unwrap();
        *joins.entry(credentials.channel_name.clone()).or_insert(0) += 1;

        Ok(LocalTracks {
            audio_track: Some(format!("audio-{}", credentials.channel_name)),
            video_track: call_type
                .has_video()
                .then(|| format!("video-{}", credentials.channel_name)),
        })
    }

    async fn leave(&self, channel_name: &str) -> std::result::Result<(), TransportError> {
        if self.leave_fails.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(format!(
                "no leave acknowledgment for {}",
                channel_name
            )));
        }
        Ok(())
    }

    async fn set_track_enabled(
        &self,
        channel_name: &str,
        kind: TrackKind,
        enabled: bool,
    ) -> std::result::Result<(), TransportError> {
        let mut states = self.track_states.lock().unwrap();
        states.insert((channel_name.to_string(), kind), enabled);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
