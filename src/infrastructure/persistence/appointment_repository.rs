//! PostgreSQL implementation of the appointment surface

use crate::domain::appointment::{
    Appointment, AppointmentRepository, AppointmentStatus, CancellationNote,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{AppointmentId, Currency, ExpertId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::error;
use uuid::Uuid;

#[derive(FromRow)]
struct AppointmentRow {
    id: Uuid,
    expert_id: Uuid,
    user_id: Uuid,
    appointment_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    duration_minutes: i32,
    status: String,
    price: f64,
    currency: String,
    notes: Option<String>,
    refund_processed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AppointmentRow> for Appointment {
    fn from(r: AppointmentRow) -> Self {
        Appointment {
            id: AppointmentId::from_uuid(r.id),
            expert_id: ExpertId::from_uuid(r.expert_id),
            user_id: UserId::from_uuid(r.user_id),
            appointment_date: r.appointment_date,
            start_time: r.start_time,
            end_time: r.end_time,
            duration_minutes: r.duration_minutes.max(0) as u32,
            status: AppointmentStatus::from_str(&r.status).unwrap_or(AppointmentStatus::Cancelled),
            price: r.price,
            currency: Currency::from_code(&r.currency),
            notes: r.notes,
            refund_processed: r.refund_processed,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    error!("appointment database error: {}", e);
    DomainError::LedgerUnavailable(e.to_string())
}

pub struct PgAppointmentRepository {
    pool: PgPool,
}

impl PgAppointmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppointmentRepository for PgAppointmentRepository {
    async fn find_by_id(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        let row = sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(Appointment::from))
    }

    async fn find_confirmed_started(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>> {
        // Date filter narrows the scan; the exact wall-clock comparison
        // happens on the derived start instant
        let rows = sqlx::query_as::<_, AppointmentRow>(
            "SELECT * FROM appointments WHERE status = 'confirmed' AND appointment_date <= $1",
        )
        .bind(now.date_naive())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(Appointment::from)
            .filter(|a| a.starts_at() <= now)
            .collect())
    }

    async fn cancel_if_confirmed(
        &self,
        id: AppointmentId,
        note: &CancellationNote,
    ) -> Result<bool> {
        let notes = serde_json::to_string(note)
            .map_err(|e| DomainError::Internal(format!("notes payload: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE appointments
            SET status = 'cancelled', notes = $2, updated_at = $3
            WHERE id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(id.as_uuid())
        .bind(notes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish "lost the race" from "no such appointment"
        match self.find_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(DomainError::NotFound(format!("appointment {}", id))),
        }
    }

    async fn mark_refund_processed(&self, id: AppointmentId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE appointments SET refund_processed = TRUE, updated_at = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("appointment {}", id)));
        }
        Ok(())
    }
}
