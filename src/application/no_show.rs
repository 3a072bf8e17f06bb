//! No-show detection and automatic refunds
//!
//! A polling evaluator over confirmed appointments - signaling-free on
//! purpose, so it works even when the expert's client never connects.
//! Windows are derived from the scheduled date and start time, never from
//! client-reported clocks.

use crate::application::settlement::{SettlementJob, SettlementQueue};
use crate::domain::appointment::{
    Appointment, AppointmentRepository, AppointmentStatus, CancellationNote,
    CANCELLATION_EXPERT_NO_SHOW,
};
use crate::domain::notification::{NotificationKind, Notifier};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::AppointmentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Grace windows measured from the scheduled start
#[derive(Debug, Clone)]
pub struct NoShowConfig {
    /// When the "expert hasn't joined" warning becomes reportable
    pub warning_after: chrono::Duration,
    /// Hard threshold: cancel and refund past this point
    pub cancel_after: chrono::Duration,
    pub poll_interval: std::time::Duration,
}

impl Default for NoShowConfig {
    fn default() -> Self {
        Self {
            warning_after: chrono::Duration::minutes(3),
            cancel_after: chrono::Duration::minutes(5),
            poll_interval: std::time::Duration::from_secs(30),
        }
    }
}

/// Where one appointment sits relative to its no-show windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoShowPhase {
    /// Scheduled start is still in the future
    NotStarted,
    /// Started, expert missing, inside the informational window
    Warning,
    /// Warning threshold passed; the user may report the no-show
    Reportable,
    /// Hard threshold passed with no expert join
    NoShow,
    /// Expert joined in time; evaluation is permanently off
    Suppressed,
}

/// Pure window evaluation. The expert's join is a monotonic one-way fact:
/// once recorded before the hard threshold, the phase is `Suppressed` for
/// every later `now`.
pub fn evaluate_phase(
    starts_at: DateTime<Utc>,
    joined_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &NoShowConfig,
) -> NoShowPhase {
    let hard_threshold = starts_at + config.cancel_after;
    if let Some(joined) = joined_at {
        if joined < hard_threshold {
            return NoShowPhase::Suppressed;
        }
    }

    if now < starts_at {
        NoShowPhase::NotStarted
    } else if now < starts_at + config.warning_after {
        NoShowPhase::Warning
    } else if now < hard_threshold {
        NoShowPhase::Reportable
    } else {
        NoShowPhase::NoShow
    }
}

/// Answer to the no-show query exposed to the rest of the product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoShowState {
    pub is_no_show: bool,
    pub can_report_no_show: bool,
    pub refund_processed: bool,
    pub is_warning: bool,
}

/// Watches confirmed appointments for the expert-never-joined condition
/// and drives the compensating refund.
pub struct NoShowMonitor {
    appointments: Arc<dyn AppointmentRepository>,
    settlement: SettlementQueue,
    notifier: Arc<dyn Notifier>,
    config: NoShowConfig,
    joins: Mutex<HashMap<AppointmentId, DateTime<Utc>>>,
    handled: Mutex<HashSet<AppointmentId>>,
}

impl NoShowMonitor {
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        settlement: SettlementQueue,
        notifier: Arc<dyn Notifier>,
        config: NoShowConfig,
    ) -> Self {
        Self {
            appointments,
            settlement,
            notifier,
            config,
            joins: Mutex::new(HashMap::new()),
            handled: Mutex::new(HashSet::new()),
        }
    }

    /// Record that the expert joined the appointment's session. First join
    /// wins and is never overwritten, which is what makes suppression
    /// race-free. Returns whether this was the first join.
    pub fn record_expert_join(&self, appointment_id: AppointmentId) -> bool {
        let mut joins = self.joins.lock().unwrap();
        if joins.contains_key(&appointment_id) {
            return false;
        }
        joins.insert(appointment_id, Utc::now());
        info!(%appointment_id, "expert join recorded");
        true
    }

    /// No-show query for one appointment
    pub async fn no_show_state(&self, appointment_id: AppointmentId) -> Result<NoShowState> {
        let appointment = self
            .appointments
            .find_by_id(appointment_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("appointment {}", appointment_id)))?;

        Ok(self.state_for(&appointment, Utc::now()))
    }

    fn state_for(&self, appointment: &Appointment, now: DateTime<Utc>) -> NoShowState {
        let joined_at = self.joins.lock().unwrap().get(&appointment.id).copied();
        let phase = evaluate_phase(appointment.starts_at(), joined_at, now, &self.config);

        let cancelled_as_no_show = appointment.status == AppointmentStatus::Cancelled
            && appointment
                .notes
                .as_deref()
                .map(|notes| notes.contains(CANCELLATION_EXPERT_NO_SHOW))
                .unwrap_or(false);

        let confirmed = appointment.status == AppointmentStatus::Confirmed;

        NoShowState {
            is_no_show: cancelled_as_no_show || (confirmed && phase == NoShowPhase::NoShow),
            can_report_no_show: confirmed
                && matches!(phase, NoShowPhase::Reportable | NoShowPhase::NoShow),
            refund_processed: appointment.refund_processed,
            is_warning: confirmed
                && matches!(phase, NoShowPhase::Warning | NoShowPhase::Reportable),
        }
    }

    /// One evaluation pass over every confirmed, already-started
    /// appointment. Returns how many no-shows were triggered. Safe to run
    /// concurrently with expert joins and other sweeps: the cancellation
    /// is a compare-and-set and join recording is monotonic.
    pub async fn evaluate_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.appointments.find_confirmed_started(now).await?;
        let mut triggered = 0;

        for appointment in due {
            let joined_at = self.joins.lock().unwrap().get(&appointment.id).copied();
            match evaluate_phase(appointment.starts_at(), joined_at, now, &self.config) {
                NoShowPhase::NoShow => {
                    if self.handled.lock().unwrap().contains(&appointment.id) {
                        continue;
                    }
                    if self.trigger_no_show(&appointment, now).await {
                        triggered += 1;
                    }
                }
                NoShowPhase::Warning | NoShowPhase::Reportable => {
                    // Informational only; no mutation before the hard
                    // threshold
                    debug!(
                        appointment_id = %appointment.id,
                        "expert has not joined yet"
                    );
                }
                _ => {}
            }
        }

        Ok(triggered)
    }

    async fn trigger_no_show(&self, appointment: &Appointment, now: DateTime<Utc>) -> bool {
        let note = CancellationNote::expert_no_show(now);
        let won = match self
            .appointments
            .cancel_if_confirmed(appointment.id, &note)
            .await
        {
            Ok(won) => won,
            Err(e) => {
                // Leave it unhandled; the next poll retries the cancel
                error!(appointment_id = %appointment.id, error = %e, "no-show cancellation failed");
                return false;
            }
        };

        self.handled.lock().unwrap().insert(appointment.id);

        if !won {
            debug!(appointment_id = %appointment.id, "appointment already left confirmed");
            return false;
        }

        warn!(
            appointment_id = %appointment.id,
            expert_id = %appointment.expert_id,
            "expert no-show: appointment cancelled, refunding full session cost"
        );
        metrics::counter!("no_show_cancellations").increment(1);

        // The refund itself is retried in the background; a cancelled-but-
        // unrefunded appointment is a valid state until reconciled.
        self.settlement.enqueue(SettlementJob::Refund {
            appointment_id: appointment.id,
            user_id: appointment.user_id,
            amount: appointment.price,
            currency: appointment.currency.clone(),
        });

        self.notifier
            .notify(
                appointment.user_id.as_uuid(),
                NotificationKind::AppointmentCancelled,
                json!({
                    "appointment_id": appointment.id,
                    "reason": CANCELLATION_EXPERT_NO_SHOW,
                    "refund_amount": appointment.price,
                    "currency": appointment.currency.code(),
                }),
            )
            .await;

        true
    }

    /// Poll loop; spawn once at startup.
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.config.poll_interval, "no-show monitor started");
        let mut interval = tokio::time::interval(self.config.poll_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.evaluate_due(Utc::now()).await {
                error!(error = %e, "no-show evaluation pass failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::settlement::{settlement_channel, SettlementConfig};
    use crate::domain::appointment::MockAppointmentRepository;
    use crate::domain::notification::MockNotifier;
    use crate::domain::payment::{MockPaymentGateway, RefundOutcome};
    use crate::domain::shared::value_objects::{Currency, ExpertId, UserId};
    use chrono::TimeZone;

    fn config() -> NoShowConfig {
        NoShowConfig::default()
    }

    // Scheduled in the far future so joins recorded "now" always land
    // before the hard threshold
    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2099, 6, 2, 10, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        start() + chrono::Duration::minutes(minutes)
    }

    #[test]
    fn test_phase_before_start() {
        assert_eq!(
            evaluate_phase(start(), None, at(-10), &config()),
            NoShowPhase::NotStarted
        );
    }

    #[test]
    fn test_phase_windows() {
        let cfg = config();
        assert_eq!(
            evaluate_phase(start(), None, at(1), &cfg),
            NoShowPhase::Warning
        );
        assert_eq!(
            evaluate_phase(start(), None, at(4), &cfg),
            NoShowPhase::Reportable
        );
        assert_eq!(
            evaluate_phase(start(), None, at(5), &cfg),
            NoShowPhase::NoShow
        );
        assert_eq!(
            evaluate_phase(start(), None, at(90), &cfg),
            NoShowPhase::NoShow
        );
    }

    #[test]
    fn test_join_before_hard_threshold_suppresses_forever() {
        let cfg = config();
        let joined = Some(at(3));

        // Scenario: expert joins at 10:03; at 10:06 and any later time the
        // appointment is never a no-show
        assert_eq!(
            evaluate_phase(start(), joined, at(6), &cfg),
            NoShowPhase::Suppressed
        );
        assert_eq!(
            evaluate_phase(start(), joined, at(600), &cfg),
            NoShowPhase::Suppressed
        );
    }

    #[test]
    fn test_join_after_hard_threshold_does_not_suppress() {
        let cfg = config();
        assert_eq!(
            evaluate_phase(start(), Some(at(7)), at(8), &cfg),
            NoShowPhase::NoShow
        );
    }

    fn confirmed_appointment() -> Appointment {
        let now = Utc::now();
        Appointment {
            id: AppointmentId::new(),
            expert_id: ExpertId::new(),
            user_id: UserId::new(),
            appointment_date: "2099-06-02".parse().unwrap(),
            start_time: "10:00:00".parse().unwrap(),
            end_time: "10:30:00".parse().unwrap(),
            duration_minutes: 30,
            status: AppointmentStatus::Confirmed,
            price: 45.0,
            currency: Currency::USD,
            notes: None,
            refund_processed: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn monitor_with(
        appointments: Arc<dyn AppointmentRepository>,
        refund_outcome: RefundOutcome,
    ) -> (Arc<NoShowMonitor>, tokio::task::JoinHandle<()>) {
        let mut payments = MockPaymentGateway::new();
        payments
            .expect_refund()
            .returning(move |_, _, _, _| Ok(refund_outcome));

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_, _, _| ());
        let notifier = Arc::new(notifier);

        let (settlement, worker) = settlement_channel(
            Arc::new(payments),
            Arc::clone(&appointments),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            SettlementConfig {
                max_attempts: 2,
                retry_backoff: std::time::Duration::from_millis(1),
            },
        );
        let worker_handle = tokio::spawn(worker.run());

        (
            Arc::new(NoShowMonitor::new(
                appointments,
                settlement,
                notifier,
                config(),
            )),
            worker_handle,
        )
    }

    #[tokio::test]
    async fn test_no_show_cancels_and_refunds() {
        let appointment = confirmed_appointment();
        let appointment_id = appointment.id;

        let mut repo = MockAppointmentRepository::new();
        let listed = appointment.clone();
        repo.expect_find_confirmed_started()
            .returning(move |_| Ok(vec![listed.clone()]));
        repo.expect_cancel_if_confirmed()
            .times(1)
            .withf(move |id, note| {
                *id == appointment_id && note.cancellation_reason == CANCELLATION_EXPERT_NO_SHOW
            })
            .returning(|_, _| Ok(true));
        repo.expect_mark_refund_processed()
            .times(1)
            .returning(|_| Ok(()));

        let (monitor, worker) = monitor_with(Arc::new(repo), RefundOutcome::Confirmed);

        // Scenario: start 10:00, expert never joins, evaluated at 10:05
        let triggered = monitor.evaluate_due(at(5)).await.unwrap();
        assert_eq!(triggered, 1);

        // Second pass is idempotent
        let again = monitor.evaluate_due(at(6)).await.unwrap();
        assert_eq!(again, 0);

        drop(monitor);
        worker.await.ok();
    }

    #[tokio::test]
    async fn test_no_mutation_inside_warning_window() {
        let appointment = confirmed_appointment();

        let mut repo = MockAppointmentRepository::new();
        let listed = appointment.clone();
        repo.expect_find_confirmed_started()
            .returning(move |_| Ok(vec![listed.clone()]));
        repo.expect_cancel_if_confirmed().times(0);

        let (monitor, worker) = monitor_with(Arc::new(repo), RefundOutcome::Confirmed);

        assert_eq!(monitor.evaluate_due(at(2)).await.unwrap(), 0);
        assert_eq!(monitor.evaluate_due(at(4)).await.unwrap(), 0);

        drop(monitor);
        worker.await.ok();
    }

    #[tokio::test]
    async fn test_recorded_join_suppresses_cancellation() {
        let appointment = confirmed_appointment();
        let appointment_id = appointment.id;

        let mut repo = MockAppointmentRepository::new();
        let listed = appointment.clone();
        repo.expect_find_confirmed_started()
            .returning(move |_| Ok(vec![listed.clone()]));
        repo.expect_cancel_if_confirmed().times(0);
        let for_state = appointment.clone();
        repo.expect_find_by_id()
            .returning(move |_| Ok(Some(for_state.clone())));

        let (monitor, worker) = monitor_with(Arc::new(repo), RefundOutcome::Confirmed);

        assert!(monitor.record_expert_join(appointment_id));
        // Second report of the same join is ignored
        assert!(!monitor.record_expert_join(appointment_id));

        assert_eq!(monitor.evaluate_due(at(10)).await.unwrap(), 0);

        let state = monitor.no_show_state(appointment_id).await.unwrap();
        assert!(!state.is_no_show);
        assert!(!state.is_warning);

        drop(monitor);
        worker.await.ok();
    }

    #[tokio::test]
    async fn test_lost_cancel_race_is_not_a_no_show() {
        let appointment = confirmed_appointment();

        let mut repo = MockAppointmentRepository::new();
        let listed = appointment.clone();
        repo.expect_find_confirmed_started()
            .returning(move |_| Ok(vec![listed.clone()]));
        // Another writer (user cancellation, admin) got there first
        repo.expect_cancel_if_confirmed()
            .times(1)
            .returning(|_, _| Ok(false));

        let (monitor, worker) = monitor_with(Arc::new(repo), RefundOutcome::Confirmed);
        assert_eq!(monitor.evaluate_due(at(5)).await.unwrap(), 0);

        drop(monitor);
        worker.await.ok();
    }
}
