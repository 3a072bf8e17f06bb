//! Scheduled appointments, as seen by the no-show monitor
//!
//! Appointments are owned by the booking subsystem. This context reads
//! them, plus one narrow write: cancellation with a structured reason and
//! a notes payload recording the no-show metadata.

use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AppointmentId, Currency, ExpertId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Appointment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }
}

/// Structured cancellation reason written into the notes payload
pub const CANCELLATION_EXPERT_NO_SHOW: &str = "expert_no_show";

/// Notes payload recorded on a no-show cancellation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationNote {
    pub cancellation_reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl CancellationNote {
    pub fn expert_no_show(cancelled_at: DateTime<Utc>) -> Self {
        Self {
            cancellation_reason: CANCELLATION_EXPERT_NO_SHOW.to_string(),
            cancelled_at,
        }
    }
}

/// A scheduled session between a user and an expert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub expert_id: ExpertId,
    pub user_id: UserId,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    /// Amount the user paid for the session, refunded in full on no-show
    pub price: f64,
    pub currency: Currency,
    pub notes: Option<String>,
    pub refund_processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Session start derived from the scheduled date and time. No-show
    /// windows are evaluated strictly against this wall-clock instant,
    /// never client-reported time.
    pub fn starts_at(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.appointment_date.and_time(self.start_time))
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.starts_at() + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }
}

/// Read path plus the narrow cancellation write used by the monitor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn find_by_id(&self, id: AppointmentId) -> Result<Option<Appointment>>;

    /// Confirmed appointments whose scheduled start is at or before `now` -
    /// the candidates for no-show evaluation.
    async fn find_confirmed_started(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>>;

    /// Compare-and-set cancellation: only a `confirmed` appointment moves
    /// to `cancelled`. Returns false when another writer got there first.
    async fn cancel_if_confirmed(&self, id: AppointmentId, note: &CancellationNote)
        -> Result<bool>;

    /// Set once the payment collaborator confirms the refund.
    async fn mark_refund_processed(&self, id: AppointmentId) -> Result<()>;
}
