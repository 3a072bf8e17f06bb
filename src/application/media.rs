//! Media session controller
//!
//! Thin but stateful wrapper over the black-box transport SDK: local
//! mute/video flags, a roster of remote participants, and a billable
//! duration counter sampled from a monotonic timestamp so wall-clock skew
//! never jumps the timer.

use crate::domain::call::session::CallSession;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::transport::{MediaTransport, TrackKind, TransportEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Timeouts and debounce for one client connection
#[derive(Debug, Clone)]
pub struct MediaControllerConfig {
    pub join_timeout: Duration,
    pub leave_timeout: Duration,
    /// Rapid double-invocations of a toggle inside this window collapse
    /// into one press instead of oscillating the track.
    pub toggle_debounce: Duration,
}

impl Default for MediaControllerConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            leave_timeout: Duration::from_secs(5),
            toggle_debounce: Duration::from_millis(250),
        }
    }
}

/// A remote party currently publishing into the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    pub participant_id: String,
    pub audio_published: bool,
    pub video_published: bool,
}

#[derive(Default)]
struct MediaState {
    joined: bool,
    muted: bool,
    video_enabled: bool,
    remote: HashMap<String, RemoteParticipant>,
    last_audio_toggle: Option<Instant>,
    last_video_toggle: Option<Instant>,
}

/// Wraps the transport SDK for the lifetime of one client connection.
/// Holds a read-only copy of the session; the ledger stays the owner.
pub struct MediaSessionController {
    transport: Arc<dyn MediaTransport>,
    session: CallSession,
    config: MediaControllerConfig,
    state: Arc<Mutex<MediaState>>,
    started: StdMutex<Option<Instant>>,
    elapsed: Arc<AtomicU64>,
    ever_joined: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl MediaSessionController {
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        session: CallSession,
        config: MediaControllerConfig,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            state: Arc::new(Mutex::new(MediaState::default())),
            started: StdMutex::new(None),
            elapsed: Arc::new(AtomicU64::new(0)),
            ever_joined: AtomicBool::new(false),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    /// Join the transport channel with the session credentials. Bounded by
    /// the join timeout; a second join on an already-joined controller is
    /// a no-op.
    pub async fn join(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.joined {
            return Ok(());
        }

        let joined = tokio::time::timeout(
            self.config.join_timeout,
            self.transport
                .join(&self.session.credentials, self.session.call_type),
        )
        .await;

        let _tracks = match joined {
            Ok(Ok(tracks)) => tracks,
            Ok(Err(e)) => {
                return Err(DomainError::TransportJoinFailed(e.to_string()));
            }
            Err(_) => {
                return Err(DomainError::TransportJoinFailed(format!(
                    "no join acknowledgment within {:?}",
                    self.config.join_timeout
                )));
            }
        };

        state.joined = true;
        state.muted = false;
        state.video_enabled = self.session.call_type.has_video();
        self.ever_joined.store(true, Ordering::SeqCst);

        let started = Instant::now();
        *self.started.lock().unwrap() = Some(started);

        self.spawn_duration_ticker(started);
        self.spawn_roster_listener();

        info!(
            session_id = %self.session.id,
            channel = %self.session.credentials.channel_name,
            "joined media transport"
        );
        Ok(())
    }

    /// Flip the local mute flag and instruct the transport. Idempotent
    /// against rapid double-invocation: a second press inside the debounce
    /// window returns the already-applied state.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(last) = state.last_audio_toggle {
            if now.duration_since(last) < self.config.toggle_debounce {
                debug!(session_id = %self.session.id, "ignoring rapid mute toggle");
                return Ok(state.muted);
            }
        }
        state.last_audio_toggle = Some(now);

        let muted = !state.muted;
        if state.joined {
            self.transport
                .set_track_enabled(
                    &self.session.credentials.channel_name,
                    TrackKind::Audio,
                    !muted,
                )
                .await
                .map_err(|e| DomainError::Internal(e.to_string()))?;
        }
        state.muted = muted;
        Ok(muted)
    }

    /// Flip the local video flag and instruct the transport, with the same
    /// debounce as mute.
    pub async fn toggle_video(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(last) = state.last_video_toggle {
            if now.duration_since(last) < self.config.toggle_debounce {
                debug!(session_id = %self.session.id, "ignoring rapid video toggle");
                return Ok(state.video_enabled);
            }
        }
        state.last_video_toggle = Some(now);

        let enabled = !state.video_enabled;
        if state.joined {
            self.transport
                .set_track_enabled(
                    &self.session.credentials.channel_name,
                    TrackKind::Video,
                    enabled,
                )
                .await
                .map_err(|e| DomainError::Internal(e.to_string()))?;
        }
        state.video_enabled = enabled;
        Ok(enabled)
    }

    /// Leave the channel. Local media state is released unconditionally,
    /// even when the remote leave acknowledgment times out.
    pub async fn leave(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        // Freeze the duration counter before tearing anything down
        if let Some(started) = self.started.lock().unwrap().take() {
            self.elapsed
                .store(started.elapsed().as_secs(), Ordering::SeqCst);
        }

        let channel = self.session.credentials.channel_name.clone();
        match tokio::time::timeout(self.config.leave_timeout, self.transport.leave(&channel)).await
        {
            Ok(Ok(())) => {
                info!(session_id = %self.session.id, "left media transport");
            }
            Ok(Err(e)) => {
                warn!(session_id = %self.session.id, error = %e, "transport leave failed");
            }
            Err(_) => {
                warn!(
                    session_id = %self.session.id,
                    "leave acknowledgment timed out, releasing local media anyway"
                );
            }
        }

        let mut state = self.state.lock().await;
        state.joined = false;
        state.remote.clear();
    }

    /// Billable duration so far, sampled from the monotonic call start
    pub fn elapsed_seconds(&self) -> u64 {
        match *self.started.lock().unwrap() {
            Some(started) => started.elapsed().as_secs(),
            None => self.elapsed.load(Ordering::SeqCst),
        }
    }

    /// Whether this controller ever completed a join
    pub fn was_joined(&self) -> bool {
        self.ever_joined.load(Ordering::SeqCst)
    }

    pub async fn is_muted(&self) -> bool {
        self.state.lock().await.muted
    }

    pub async fn is_video_enabled(&self) -> bool {
        self.state.lock().await.video_enabled
    }

    pub async fn remote_participants(&self) -> Vec<RemoteParticipant> {
        self.state.lock().await.remote.values().cloned().collect()
    }

    fn spawn_duration_ticker(&self, started: Instant) {
        let elapsed = Arc::clone(&self.elapsed);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                elapsed.store(started.elapsed().as_secs(), Ordering::SeqCst);
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    fn spawn_roster_listener(&self) {
        let mut events = self.transport.subscribe();
        let state = Arc::clone(&self.state);
        let channel = self.session.credentials.channel_name.clone();
        let own_participant = self.session.credentials.transport_participant_id.clone();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        apply_roster_event(&state, &channel, &own_participant, event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "roster listener lagged behind transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }
}

async fn apply_roster_event(
    state: &Mutex<MediaState>,
    channel: &str,
    own_participant: &str,
    event: TransportEvent,
) {
    match event {
        TransportEvent::ParticipantPublished {
            channel_name,
            participant_id,
            kind,
        } if channel_name == channel && participant_id != own_participant => {
            let mut state = state.lock().await;
            let entry = state
                .remote
                .entry(participant_id.clone())
                .or_insert_with(|| RemoteParticipant {
                    participant_id,
                    audio_published: false,
                    video_published: false,
                });
            match kind {
                TrackKind::Audio => entry.audio_published = true,
                TrackKind::Video => entry.video_published = true,
            }
        }
        TransportEvent::ParticipantUnpublished {
            channel_name,
            participant_id,
            kind,
        } if channel_name == channel => {
            let mut state = state.lock().await;
            let drop_entry = if let Some(entry) = state.remote.get_mut(&participant_id) {
                match kind {
                    TrackKind::Audio => entry.audio_published = false,
                    TrackKind::Video => entry.video_published = false,
                }
                !entry.audio_published && !entry.video_published
            } else {
                false
            };
            if drop_entry {
                state.remote.remove(&participant_id);
            }
        }
        TransportEvent::ParticipantLeft {
            channel_name,
            participant_id,
        } if channel_name == channel => {
            state.lock().await.remote.remove(&participant_id);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::session::{CallSession, SessionCredentials};
    use crate::domain::shared::value_objects::{CallType, Currency, ExpertId, SessionId, UserId};
    use crate::infrastructure::transport::loopback::LoopbackTransport;

    fn test_session(call_type: CallType) -> CallSession {
        CallSession::new(
            SessionId::new(),
            SessionCredentials {
                channel_name: "wellness-test".to_string(),
                transport_token: "token".to_string(),
                transport_participant_id: "caller-1".to_string(),
            },
            UserId::new(),
            ExpertId::new(),
            call_type,
            10.0,
            Currency::USD,
        )
    }

    fn controller(transport: Arc<LoopbackTransport>, call_type: CallType) -> MediaSessionController {
        MediaSessionController::new(transport, test_session(call_type), MediaControllerConfig::default())
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = controller(transport.clone(), CallType::Audio);

        controller.join().await.unwrap();
        controller.join().await.unwrap();

        assert!(controller.was_joined());
        assert_eq!(transport.join_count("wellness-test"), 1);
    }

    #[tokio::test]
    async fn test_rapid_double_toggle_lands_as_single_press() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = controller(transport, CallType::Audio);
        controller.join().await.unwrap();

        assert!(!controller.is_muted().await);

        // Two presses inside the debounce window: the second is absorbed
        let first = controller.toggle_mute().await.unwrap();
        let second = controller.toggle_mute().await.unwrap();

        assert!(first);
        assert!(second);
        assert!(controller.is_muted().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_toggles_flip_back() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = controller(transport, CallType::Audio);
        controller.join().await.unwrap();

        assert!(controller.toggle_mute().await.unwrap());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(!controller.toggle_mute().await.unwrap());
    }

    #[tokio::test]
    async fn test_video_flag_follows_call_type() {
        let transport = Arc::new(LoopbackTransport::new());

        let audio = controller(transport.clone(), CallType::Audio);
        audio.join().await.unwrap();
        assert!(!audio.is_video_enabled().await);

        let video = controller(transport, CallType::Video);
        video.join().await.unwrap();
        assert!(video.is_video_enabled().await);
    }

    #[tokio::test]
    async fn test_roster_tracks_publish_and_leave() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = controller(transport.clone(), CallType::Video);
        controller.join().await.unwrap();

        transport.emit(TransportEvent::ParticipantPublished {
            channel_name: "wellness-test".to_string(),
            participant_id: "expert-9".to_string(),
            kind: TrackKind::Audio,
        });
        // Own publishes never land in the remote roster
        transport.emit(TransportEvent::ParticipantPublished {
            channel_name: "wellness-test".to_string(),
            participant_id: "caller-1".to_string(),
            kind: TrackKind::Audio,
        });
        tokio::task::yield_now().await;

        let roster = controller.remote_participants().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].participant_id, "expert-9");
        assert!(roster[0].audio_published);

        transport.emit(TransportEvent::ParticipantLeft {
            channel_name: "wellness-test".to_string(),
            participant_id: "expert-9".to_string(),
        });
        tokio::task::yield_now().await;
        assert!(controller.remote_participants().await.is_empty());
    }

    #[tokio::test]
    async fn test_leave_releases_local_media_unconditionally() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.fail_leave(true);

        let controller = controller(transport.clone(), CallType::Audio);
        controller.join().await.unwrap();
        controller.leave().await;

        assert!(controller.remote_participants().await.is_empty());
        // A fresh join is allowed after teardown
        controller.join().await.unwrap();
        assert_eq!(transport.join_count("wellness-test"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_counts_from_join() {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = controller(transport, CallType::Audio);
        controller.join().await.unwrap();

        tokio::time::advance(Duration::from_secs(12)).await;
        assert_eq!(controller.elapsed_seconds(), 12);

        controller.leave().await;
        let frozen = controller.elapsed_seconds();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(controller.elapsed_seconds(), frozen);
    }
}
