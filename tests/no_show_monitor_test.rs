//! No-show monitor integration tests
//!
//! Runs the monitor against the in-memory appointment store and wallet
//! gateway, including the retry path for failed refunds.

use chrono::{TimeZone, Utc};
use sageline::application::no_show::{NoShowConfig, NoShowMonitor};
use sageline::application::settlement::{settlement_channel, SettlementConfig};
use sageline::domain::appointment::{Appointment, AppointmentRepository, AppointmentStatus};
use sageline::domain::shared::value_objects::{AppointmentId, Currency, ExpertId, UserId};
use sageline::infrastructure::appointments::InMemoryAppointmentRepository;
use sageline::infrastructure::payments::InMemoryPaymentGateway;
use sageline::interface::api::websocket::{EventBroadcaster, WsNotifier};
use std::sync::Arc;
use std::time::Duration;

fn confirmed_appointment() -> Appointment {
    let now = Utc::now();
    Appointment {
        id: AppointmentId::new(),
        expert_id: ExpertId::new(),
        user_id: UserId::new(),
        appointment_date: "2099-09-18".parse().unwrap(),
        start_time: "10:00:00".parse().unwrap(),
        end_time: "10:30:00".parse().unwrap(),
        duration_minutes: 30,
        status: AppointmentStatus::Confirmed,
        price: 80.0,
        currency: Currency::USD,
        notes: None,
        refund_processed: false,
        created_at: now,
        updated_at: now,
    }
}

fn at(minutes: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 9, 18, 10, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

struct MonitorStack {
    monitor: Arc<NoShowMonitor>,
    appointments: Arc<InMemoryAppointmentRepository>,
    payments: Arc<InMemoryPaymentGateway>,
}

fn stack() -> MonitorStack {
    let appointments = Arc::new(InMemoryAppointmentRepository::new());
    let payments = Arc::new(InMemoryPaymentGateway::new());
    let notifier = Arc::new(WsNotifier::new(Arc::new(EventBroadcaster::default())));

    let (settlement, worker) = settlement_channel(
        payments.clone(),
        appointments.clone(),
        notifier.clone(),
        SettlementConfig {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(5),
        },
    );
    tokio::spawn(worker.run());

    MonitorStack {
        monitor: Arc::new(NoShowMonitor::new(
            appointments.clone(),
            settlement,
            notifier,
            NoShowConfig::default(),
        )),
        appointments,
        payments,
    }
}

async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn test_expert_no_show_cancels_and_refunds_in_full() {
    let stack = stack();
    let appointment = confirmed_appointment();
    let id = appointment.id;
    stack.appointments.insert(appointment);

    // 10:02 - still inside the grace period, nothing happens
    assert_eq!(stack.monitor.evaluate_due(at(2)).await.unwrap(), 0);
    let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Confirmed);

    // 10:05 - hard threshold: cancelled with a structured reason
    assert_eq!(stack.monitor.evaluate_due(at(5)).await.unwrap(), 1);
    let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    let notes = stored.notes.expect("cancellation notes recorded");
    assert!(notes.contains("expert_no_show"));
    assert!(notes.contains("cancelled_at"));

    // Refund for the full price lands and flips the flag
    let payments = stack.payments.clone();
    wait_until(move || payments.refund_count() == 1).await;

    let mut flagged = false;
    for _ in 0..200 {
        let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
        if stored.refund_processed {
            flagged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(flagged, "refund confirmation never flipped the flag");

    let state = stack.monitor.no_show_state(id).await.unwrap();
    assert!(state.is_no_show);
    assert!(state.refund_processed);
}

#[tokio::test]
async fn test_expert_join_within_window_suppresses_forever() {
    let stack = stack();
    let appointment = confirmed_appointment();
    let id = appointment.id;
    stack.appointments.insert(appointment);

    // Expert joins at 10:03, inside the grace window
    assert!(stack.monitor.record_expert_join(id));

    // 10:06 and far beyond: never a no-show
    assert_eq!(stack.monitor.evaluate_due(at(6)).await.unwrap(), 0);
    assert_eq!(stack.monitor.evaluate_due(at(120)).await.unwrap(), 0);

    let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
    assert_eq!(stack.payments.refund_count(), 0);

    let state = stack.monitor.no_show_state(id).await.unwrap();
    assert!(!state.is_no_show);
    assert!(!state.can_report_no_show);
}

#[tokio::test]
async fn test_failed_refund_leaves_cancelled_and_retries() {
    let stack = stack();
    stack.payments.fail_refunds(true);

    let appointment = confirmed_appointment();
    let id = appointment.id;
    stack.appointments.insert(appointment);

    assert_eq!(stack.monitor.evaluate_due(at(5)).await.unwrap(), 1);

    // All attempts fail: the cancellation is not reversed and the flag
    // stays down
    let payments = stack.payments.clone();
    wait_until(move || payments.refund_count() == 3).await;

    let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert!(!stored.refund_processed);

    // Bounded attempts: no fourth try
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stack.payments.refund_count(), 3);
}

#[tokio::test]
async fn test_warning_window_is_informational() {
    let stack = stack();
    let appointment = confirmed_appointment();
    let id = appointment.id;
    stack.appointments.insert(appointment);

    // Inside the warning window the state surfaces but nothing mutates
    assert_eq!(stack.monitor.evaluate_due(at(4)).await.unwrap(), 0);

    let stored = stack.appointments.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Confirmed);
}
