//! Call signaling integration tests
//!
//! Drives the full request -> accept/decline/expire -> join protocol over
//! the in-memory ledger and the loopback transport.

use sageline::application::settlement::{settlement_channel, SettlementConfig};
use sageline::application::signaling::{
    CallPhase, CallPlacement, CallSignalingCoordinator, SignalingConfig,
};
use sageline::domain::call::ledger::SessionLedger;
use sageline::domain::call::request::RequestStatus;
use sageline::domain::call::session::SessionStatus;
use sageline::domain::identity::{Identity, StaticIdentity};
use sageline::domain::shared::value_objects::{CallType, Currency, ExpertId, UserId};
use sageline::infrastructure::appointments::InMemoryAppointmentRepository;
use sageline::infrastructure::ledger::InMemorySessionLedger;
use sageline::infrastructure::payments::{InMemoryPaymentGateway, WalletOp};
use sageline::infrastructure::transport::{HmacCredentialIssuer, LoopbackTransport};
use sageline::interface::api::websocket::{EventBroadcaster, SignalEvent, WsNotifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

struct TestStack {
    coordinator: Arc<CallSignalingCoordinator>,
    ledger: Arc<InMemorySessionLedger>,
    transport: Arc<LoopbackTransport>,
    payments: Arc<InMemoryPaymentGateway>,
    broadcaster: Arc<EventBroadcaster>,
    caller: StaticIdentity,
    caller_id: UserId,
    callee: StaticIdentity,
    callee_id: ExpertId,
}

fn stack(config: SignalingConfig) -> TestStack {
    let ledger = Arc::new(InMemorySessionLedger::new());
    let transport = Arc::new(LoopbackTransport::new());
    let payments = Arc::new(InMemoryPaymentGateway::new());
    let broadcaster = Arc::new(EventBroadcaster::default());
    let notifier = Arc::new(WsNotifier::new(Arc::clone(&broadcaster)));

    let (settlement, worker) = settlement_channel(
        payments.clone(),
        Arc::new(InMemoryAppointmentRepository::new()),
        notifier.clone(),
        SettlementConfig {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(5),
        },
    );
    tokio::spawn(worker.run());

    let coordinator = Arc::new(CallSignalingCoordinator::new(
        ledger.clone(),
        transport.clone(),
        Arc::new(HmacCredentialIssuer::new(b"integration-secret")),
        notifier,
        settlement,
        config,
    ));

    let caller_uuid = Uuid::new_v4();
    let callee_uuid = Uuid::new_v4();

    TestStack {
        coordinator,
        ledger,
        transport,
        payments,
        broadcaster,
        caller: StaticIdentity::signed_in(Identity {
            id: caller_uuid,
            display_name: "Maya".to_string(),
            avatar_url: None,
        }),
        caller_id: UserId::from_uuid(caller_uuid),
        callee: StaticIdentity::signed_in(Identity {
            id: callee_uuid,
            display_name: "Dr. Chen".to_string(),
            avatar_url: Some("https://cdn.example/chen.png".to_string()),
        }),
        callee_id: ExpertId::from_uuid(callee_uuid),
    }
}

fn placement(callee_id: ExpertId, call_type: CallType) -> CallPlacement {
    CallPlacement {
        callee_id,
        call_type,
        duration_minutes: 30,
        estimated_cost: 22.5,
        currency: Currency::USD,
    }
}

async fn wait_for_phase(rx: &mut watch::Receiver<CallPhase>, wanted: CallPhase) {
    loop {
        if *rx.borrow() == wanted {
            return;
        }
        rx.changed().await.expect("phase channel closed");
    }
}

#[tokio::test]
async fn test_full_call_lifecycle_with_settlement() {
    let stack = stack(SignalingConfig::default());

    // Callee's device is listening for the ring
    let mut signals = stack.broadcaster.subscribe();

    let started = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Video))
        .await
        .unwrap();

    // The incoming-call notification reached the expert
    let envelope = signals.recv().await.unwrap();
    assert_eq!(envelope.recipient, Some(stack.callee_id.as_uuid()));
    match envelope.event {
        SignalEvent::Signal { kind, payload, .. } => {
            assert_eq!(kind, "incoming_call");
            assert_eq!(payload["caller_name"], "Maya");
            assert_eq!(payload["call_type"], "video");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Expert accepts; caller transitions through Connecting into InCall
    let session_for_callee = stack
        .coordinator
        .accept_call(&stack.callee, started.request.id)
        .await
        .unwrap();
    assert_eq!(session_for_callee.id, started.session.id);

    let mut phases = started.phases;
    wait_for_phase(&mut phases, CallPhase::InCall).await;

    let history = stack
        .coordinator
        .phase_history(stack.caller_id)
        .await
        .unwrap();
    assert_eq!(
        history,
        vec![
            CallPhase::Idle,
            CallPhase::Requesting,
            CallPhase::Ringing,
            CallPhase::Connecting,
            CallPhase::InCall
        ]
    );

    // Session went active exactly once
    let session = stack
        .ledger
        .get_session(started.session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.started_at.is_some());

    // Hang up: session closes and the cost is settled in the background
    stack.coordinator.stop_call(stack.caller_id).await.unwrap();

    let session = stack
        .ledger
        .get_session(started.session.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Ended);

    // Give the settlement worker a beat
    tokio::time::sleep(Duration::from_millis(50)).await;
    let ops = stack.payments.operations();
    assert!(ops.iter().any(|op| matches!(
        op,
        WalletOp::Debit { user_id, amount, .. }
            if *user_id == stack.caller_id && (*amount - 22.5).abs() < f64::EPSILON
    )));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_expires_and_session_never_activates() {
    let stack = stack(SignalingConfig {
        ringing_window: Duration::from_secs(30),
        ..SignalingConfig::default()
    });

    let started = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Audio))
        .await
        .unwrap();

    let mut phases = started.phases;
    wait_for_phase(&mut phases, CallPhase::Expired).await;

    let request = stack
        .ledger
        .get_request(started.request.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, RequestStatus::Expired);

    let session = stack
        .ledger
        .get_session(started.session.id)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(session.status, SessionStatus::Active);
    assert_eq!(stack.transport.join_count_total(), 0);

    // A late accept from the expert's device is rejected by the ledger
    let late = stack
        .coordinator
        .accept_call(&stack.callee, started.request.id)
        .await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_server_side_expiry_sweep_covers_disconnected_callers() {
    let stack = stack(SignalingConfig::default());

    let started = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Audio))
        .await
        .unwrap();

    // Sweep with a zero-length window: the pending request is stale
    // immediately, as if the caller's client vanished long ago
    let expired = stack
        .ledger
        .expire_stale_requests(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(expired, 1);

    // The caller's listener still observes the terminal event
    let mut phases = started.phases;
    wait_for_phase(&mut phases, CallPhase::Expired).await;
}

#[tokio::test]
async fn test_fresh_credentials_per_attempt() {
    let stack = stack(SignalingConfig::default());

    let first = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Audio))
        .await
        .unwrap();
    stack
        .coordinator
        .decline_call(&stack.callee, first.request.id)
        .await
        .unwrap();

    let mut phases = first.phases;
    wait_for_phase(&mut phases, CallPhase::Declined).await;

    // A new attempt mints a brand new session with new credentials
    let second = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Audio))
        .await
        .unwrap();

    assert_ne!(first.session.id, second.session.id);
    assert_ne!(
        first.session.credentials.channel_name,
        second.session.credentials.channel_name
    );
    assert_ne!(
        first.session.credentials.transport_token,
        second.session.credentials.transport_token
    );
}

#[tokio::test]
async fn test_ledger_outage_fails_start_cleanly() {
    let stack = stack(SignalingConfig::default());
    stack.ledger.set_unavailable(true);

    let result = stack
        .coordinator
        .start_call(&stack.caller, placement(stack.callee_id, CallType::Audio))
        .await;
    assert!(result.is_err());

    // Nothing referencable was left behind
    stack.ledger.set_unavailable(false);
    assert_eq!(stack.ledger.count_pending_requests().await.unwrap(), 0);
}
