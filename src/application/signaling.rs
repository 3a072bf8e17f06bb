//! Call signaling coordinator
//!
//! Drives the request -> accept/decline -> join protocol between a user
//! and an expert. The ledger is the source of truth for request status;
//! this service owns the per-attempt client state machine and the
//! compensating actions around it.

use crate::application::media::{MediaControllerConfig, MediaSessionController};
use crate::application::settlement::{SettlementJob, SettlementQueue};
use crate::domain::call::ledger::SessionLedger;
use crate::domain::call::request::{CallRequest, RequestStatus};
use crate::domain::call::session::CallSession;
use crate::domain::identity::IdentityProvider;
use crate::domain::notification::{NotificationKind, Notifier};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallType, Currency, ExpertId, RequestId, SessionId, UserId};
use crate::domain::transport::{CredentialIssuer, MediaTransport};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client-observable state of one call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Requesting,
    Ringing,
    Connecting,
    InCall,
    Ended,
    Declined,
    Expired,
    Failed,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Requesting => "requesting",
            CallPhase::Ringing => "ringing",
            CallPhase::Connecting => "connecting",
            CallPhase::InCall => "in_call",
            CallPhase::Ended => "ended",
            CallPhase::Declined => "declined",
            CallPhase::Expired => "expired",
            CallPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallPhase::Ended | CallPhase::Declined | CallPhase::Expired | CallPhase::Failed
        )
    }
}

/// Signaling timeouts
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// How long the callee's device may ring before the request expires
    pub ringing_window: Duration,
    pub media: MediaControllerConfig,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            ringing_window: Duration::from_secs(45),
            media: MediaControllerConfig::default(),
        }
    }
}

/// Parameters of a new call attempt
#[derive(Debug, Clone, Deserialize)]
pub struct CallPlacement {
    pub callee_id: ExpertId,
    pub call_type: CallType,
    pub duration_minutes: u32,
    pub estimated_cost: f64,
    pub currency: Currency,
}

/// Handed back to the caller's client when an attempt starts
pub struct StartedCall {
    pub request: CallRequest,
    pub session: CallSession,
    pub phases: watch::Receiver<CallPhase>,
}

/// Phase holder: a watch channel for live observers plus the transition
/// log the dashboards read after the fact.
struct PhaseCell {
    tx: watch::Sender<CallPhase>,
    log: StdMutex<Vec<CallPhase>>,
}

impl PhaseCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(CallPhase::Idle);
        Self {
            tx,
            log: StdMutex::new(vec![CallPhase::Idle]),
        }
    }

    fn set(&self, phase: CallPhase) {
        self.log.lock().unwrap().push(phase);
        self.tx.send_replace(phase);
        info!(phase = phase.as_str(), "call phase changed");
    }

    /// Skip the transition when the caller already cancelled locally; the
    /// attempt is theirs to close.
    fn set_unless_cancelled(&self, phase: CallPhase, cancelled: &AtomicBool) {
        if !cancelled.load(Ordering::SeqCst) {
            self.set(phase);
        }
    }

    fn current(&self) -> CallPhase {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<CallPhase> {
        self.tx.subscribe()
    }

    fn history(&self) -> Vec<CallPhase> {
        self.log.lock().unwrap().clone()
    }
}

struct Attempt {
    request: CallRequest,
    session: CallSession,
    controller: Arc<MediaSessionController>,
    phase: Arc<PhaseCell>,
    cancelled: Arc<AtomicBool>,
    listener: JoinHandle<()>,
}

/// Coordinates call attempts for every connected caller. One attempt per
/// caller at a time; per-attempt state is single-writer (the listener
/// task), so only the registry itself needs a lock.
pub struct CallSignalingCoordinator {
    ledger: Arc<dyn SessionLedger>,
    transport: Arc<dyn MediaTransport>,
    credentials: Arc<dyn CredentialIssuer>,
    notifier: Arc<dyn Notifier>,
    settlement: SettlementQueue,
    config: SignalingConfig,
    attempts: Mutex<HashMap<UserId, Attempt>>,
}

impl CallSignalingCoordinator {
    pub fn new(
        ledger: Arc<dyn SessionLedger>,
        transport: Arc<dyn MediaTransport>,
        credentials: Arc<dyn CredentialIssuer>,
        notifier: Arc<dyn Notifier>,
        settlement: SettlementQueue,
        config: SignalingConfig,
    ) -> Self {
        Self {
            ledger,
            transport,
            credentials,
            notifier,
            settlement,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Place a call to an expert. Persists the request/session pair, opens
    /// the status subscription, notifies the callee, and hands the ringing
    /// attempt to a background listener bounded by the ringing window.
    pub async fn start_call(
        &self,
        identity: &dyn IdentityProvider,
        placement: CallPlacement,
    ) -> Result<StartedCall> {
        let caller = identity
            .current()
            .ok_or_else(|| DomainError::AuthRequired("no caller identity".to_string()))?;
        let caller_id = UserId::from_uuid(caller.id);

        let mut attempts = self.attempts.lock().await;
        if let Some(existing) = attempts.get(&caller_id) {
            if !existing.phase.current().is_terminal() {
                return Err(DomainError::ValidationError(format!(
                    "caller {} already has a call attempt in progress",
                    caller_id
                )));
            }
        }

        let phase = Arc::new(PhaseCell::new());
        phase.set(CallPhase::Requesting);

        let session_id = SessionId::new();
        let credentials = self.credentials.issue(session_id);
        let session = CallSession::new(
            session_id,
            credentials,
            caller_id,
            placement.callee_id,
            placement.call_type,
            placement.estimated_cost,
            placement.currency.clone(),
        );

        let session = match self.ledger.create_session(session).await {
            Ok(session) => session,
            Err(e) => {
                phase.set(CallPhase::Failed);
                return Err(e);
            }
        };

        let request = CallRequest::new(
            session.id,
            caller_id,
            placement.callee_id,
            placement.call_type,
            placement.duration_minutes,
        );
        let request = match self.ledger.create_request(request).await {
            Ok(request) => request,
            Err(e) => {
                // Leave nothing referencable behind
                self.abandon_quietly(session.id).await;
                phase.set(CallPhase::Failed);
                return Err(e);
            }
        };

        let events = match self.ledger.subscribe(request.id).await {
            Ok(events) => events,
            Err(e) => {
                self.abandon_quietly(session.id).await;
                phase.set(CallPhase::Failed);
                return Err(e);
            }
        };

        self.notifier
            .notify(
                placement.callee_id.as_uuid(),
                NotificationKind::IncomingCall,
                json!({
                    "request_id": request.id,
                    "session_id": session.id,
                    "caller_name": caller.display_name,
                    "caller_avatar": caller.avatar_url,
                    "call_type": placement.call_type.as_str(),
                    "duration_minutes": placement.duration_minutes,
                }),
            )
            .await;

        phase.set(CallPhase::Ringing);

        let controller = Arc::new(MediaSessionController::new(
            Arc::clone(&self.transport),
            session.clone(),
            self.config.media.clone(),
        ));
        let cancelled = Arc::new(AtomicBool::new(false));

        let listener = tokio::spawn(run_attempt_listener(AttemptListener {
            ledger: Arc::clone(&self.ledger),
            phase: Arc::clone(&phase),
            controller: Arc::clone(&controller),
            cancelled: Arc::clone(&cancelled),
            request_id: request.id,
            session_id: session.id,
            ringing_window: self.config.ringing_window,
            events,
        }));

        let started = StartedCall {
            request: request.clone(),
            session: session.clone(),
            phases: phase.subscribe(),
        };

        attempts.insert(
            caller_id,
            Attempt {
                request,
                session,
                controller,
                phase,
                cancelled,
                listener,
            },
        );

        Ok(started)
    }

    /// Callee accepts. Single-shot: the ledger's resolved-exactly-once
    /// compare-and-set protects against double accepts from multiple
    /// devices. Returns the session so the callee's client can join.
    pub async fn accept_call(
        &self,
        identity: &dyn IdentityProvider,
        request_id: RequestId,
    ) -> Result<CallSession> {
        identity
            .current()
            .ok_or_else(|| DomainError::AuthRequired("no callee identity".to_string()))?;

        let request = self
            .ledger
            .update_request_status(request_id, RequestStatus::Accepted)
            .await?;

        let session = self
            .ledger
            .get_session(request.session_id)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!("session {} for request", request.session_id))
            })?;

        self.notifier
            .notify(
                request.caller_id.as_uuid(),
                NotificationKind::CallAccepted,
                json!({ "request_id": request.id }),
            )
            .await;

        Ok(session)
    }

    /// Callee declines. Single-shot like accept; the session is never
    /// joined.
    pub async fn decline_call(
        &self,
        identity: &dyn IdentityProvider,
        request_id: RequestId,
    ) -> Result<()> {
        identity
            .current()
            .ok_or_else(|| DomainError::AuthRequired("no callee identity".to_string()))?;

        let request = self
            .ledger
            .update_request_status(request_id, RequestStatus::Declined)
            .await?;

        self.notifier
            .notify(
                request.caller_id.as_uuid(),
                NotificationKind::CallDeclined,
                json!({ "request_id": request.id }),
            )
            .await;

        Ok(())
    }

    /// End the caller's attempt: transport leave, then duration, then
    /// ledger close, then settlement - in that order, each step's failure
    /// logged without blocking the next. The call always ends locally.
    pub async fn stop_call(&self, caller_id: UserId) -> Result<u64> {
        let attempt = {
            let mut attempts = self.attempts.lock().await;
            attempts.remove(&caller_id).ok_or_else(|| {
                DomainError::NotFound(format!("no call attempt for caller {}", caller_id))
            })?
        };

        attempt.listener.abort();
        attempt.controller.leave().await;
        let duration_seconds = attempt.controller.elapsed_seconds();

        if attempt.controller.was_joined() {
            if let Err(e) = self
                .ledger
                .close_session(attempt.session.id, duration_seconds)
                .await
            {
                warn!(session_id = %attempt.session.id, error = %e, "ledger close failed, continuing teardown");
            }
            self.settlement.enqueue(SettlementJob::Debit {
                user_id: attempt.session.caller_id,
                session_id: attempt.session.id,
                amount: attempt.session.estimated_cost,
                currency: attempt.session.currency.clone(),
            });
        } else if let Err(e) = self.ledger.abandon_session(attempt.session.id).await {
            warn!(session_id = %attempt.session.id, error = %e, "ledger abandon failed, continuing teardown");
        }

        attempt.phase.set(CallPhase::Ended);

        self.notifier
            .notify(
                attempt.request.callee_id.as_uuid(),
                NotificationKind::CallEnded,
                json!({
                    "request_id": attempt.request.id,
                    "session_id": attempt.session.id,
                    "duration_seconds": duration_seconds,
                }),
            )
            .await;

        Ok(duration_seconds)
    }

    /// Caller abandons a ringing attempt locally. Does not mutate the
    /// ledger: a concurrent late accept is still handled by the listener,
    /// which joins and immediately tears the session down so it is never
    /// left active with nobody in it.
    pub async fn cancel(&self, caller_id: UserId) -> Result<()> {
        let attempts = self.attempts.lock().await;
        let attempt = attempts.get(&caller_id).ok_or_else(|| {
            DomainError::NotFound(format!("no call attempt for caller {}", caller_id))
        })?;

        attempt.cancelled.store(true, Ordering::SeqCst);
        attempt.phase.set(CallPhase::Ended);
        debug!(%caller_id, "call attempt cancelled locally");
        Ok(())
    }

    pub async fn toggle_mute(&self, caller_id: UserId) -> Result<bool> {
        let controller = self.controller_for(caller_id).await?;
        controller.toggle_mute().await
    }

    pub async fn toggle_video(&self, caller_id: UserId) -> Result<bool> {
        let controller = self.controller_for(caller_id).await?;
        controller.toggle_video().await
    }

    pub async fn phase(&self, caller_id: UserId) -> Option<CallPhase> {
        let attempts = self.attempts.lock().await;
        attempts.get(&caller_id).map(|a| a.phase.current())
    }

    pub async fn phase_history(&self, caller_id: UserId) -> Option<Vec<CallPhase>> {
        let attempts = self.attempts.lock().await;
        attempts.get(&caller_id).map(|a| a.phase.history())
    }

    /// Calls currently in the InCall phase (metrics)
    pub async fn active_call_count(&self) -> usize {
        let attempts = self.attempts.lock().await;
        attempts
            .values()
            .filter(|a| a.phase.current() == CallPhase::InCall)
            .count()
    }

    async fn controller_for(&self, caller_id: UserId) -> Result<Arc<MediaSessionController>> {
        let attempts = self.attempts.lock().await;
        attempts
            .get(&caller_id)
            .map(|a| Arc::clone(&a.controller))
            .ok_or_else(|| {
                DomainError::NotFound(format!("no call attempt for caller {}", caller_id))
            })
    }

    async fn abandon_quietly(&self, session_id: SessionId) {
        if let Err(e) = self.ledger.abandon_session(session_id).await {
            warn!(%session_id, error = %e, "compensating abandon failed");
        }
    }
}

struct AttemptListener {
    ledger: Arc<dyn SessionLedger>,
    phase: Arc<PhaseCell>,
    controller: Arc<MediaSessionController>,
    cancelled: Arc<AtomicBool>,
    request_id: RequestId,
    session_id: SessionId,
    ringing_window: Duration,
    events: broadcast::Receiver<CallRequest>,
}

async fn run_attempt_listener(mut ctx: AttemptListener) {
    let mut seen: HashSet<(RequestId, RequestStatus)> = HashSet::new();

    let terminal =
        match tokio::time::timeout(ctx.ringing_window, next_terminal(&mut ctx.events, &mut seen))
            .await
        {
            Ok(Some(request)) => request,
            Ok(None) => {
                // Subscription closed under us; fall back to the ledger
                match ctx.ledger.get_request(ctx.request_id).await {
                    Ok(Some(request)) if request.status.is_terminal() => request,
                    _ => {
                        warn!(request_id = %ctx.request_id, "status subscription closed while ringing");
                        ctx.phase
                            .set_unless_cancelled(CallPhase::Failed, &ctx.cancelled);
                        return;
                    }
                }
            }
            Err(_) => {
                // Ringing window elapsed. Expire via compare-and-set; if an
                // accept or decline beat us to the terminal state, the
                // ledger's answer wins.
                match ctx
                    .ledger
                    .update_request_status(ctx.request_id, RequestStatus::Expired)
                    .await
                {
                    Ok(request) => request,
                    Err(DomainError::InvalidTransition(_)) => {
                        match ctx.ledger.get_request(ctx.request_id).await {
                            Ok(Some(request)) if request.status.is_terminal() => request,
                            _ => {
                                ctx.phase
                                    .set_unless_cancelled(CallPhase::Failed, &ctx.cancelled);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(request_id = %ctx.request_id, error = %e, "expiry write failed");
                        ctx.phase
                            .set_unless_cancelled(CallPhase::Failed, &ctx.cancelled);
                        return;
                    }
                }
            }
        };

    match terminal.status {
        RequestStatus::Accepted => connect_accepted(&ctx).await,
        RequestStatus::Declined => {
            ctx.phase
                .set_unless_cancelled(CallPhase::Declined, &ctx.cancelled);
        }
        RequestStatus::Expired => {
            ctx.phase
                .set_unless_cancelled(CallPhase::Expired, &ctx.cancelled);
        }
        RequestStatus::Pending => unreachable!("next_terminal only yields terminal statuses"),
    }
}

/// Wait for the first terminal status snapshot, de-duplicating by
/// `(id, status)` - delivery is at-least-once.
async fn next_terminal(
    events: &mut broadcast::Receiver<CallRequest>,
    seen: &mut HashSet<(RequestId, RequestStatus)>,
) -> Option<CallRequest> {
    loop {
        match events.recv().await {
            Ok(request) => {
                if !seen.insert((request.id, request.status)) {
                    debug!(request_id = %request.id, status = request.status.as_str(), "duplicate status event dropped");
                    continue;
                }
                if request.status.is_terminal() {
                    return Some(request);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "status subscription lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn connect_accepted(ctx: &AttemptListener) {
    ctx.phase
        .set_unless_cancelled(CallPhase::Connecting, &ctx.cancelled);

    match ctx.controller.join().await {
        Ok(()) => {
            if ctx.cancelled.load(Ordering::SeqCst) {
                // Caller walked away during the accept race: tear straight
                // back down rather than strand an active session.
                info!(session_id = %ctx.session_id, "late accept after cancel, tearing down");
                ctx.controller.leave().await;
                if let Err(e) = ctx.ledger.abandon_session(ctx.session_id).await {
                    warn!(session_id = %ctx.session_id, error = %e, "abandon after late accept failed");
                }
                return;
            }

            if let Err(e) = ctx.ledger.activate_session(ctx.session_id).await {
                warn!(session_id = %ctx.session_id, error = %e, "session activation failed");
            }
            ctx.phase
                .set_unless_cancelled(CallPhase::InCall, &ctx.cancelled);
        }
        Err(e) => {
            warn!(session_id = %ctx.session_id, error = %e, "transport join failed");
            if let Err(abandon_err) = ctx.ledger.abandon_session(ctx.session_id).await {
                warn!(session_id = %ctx.session_id, error = %abandon_err, "abandon after failed join failed");
            }
            ctx.phase
                .set_unless_cancelled(CallPhase::Failed, &ctx.cancelled);
        }
    }
}
