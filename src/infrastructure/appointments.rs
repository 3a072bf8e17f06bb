//! In-memory appointment store
//!
//! Backs the no-show monitor in tests and `memory`-feature deployments.
//! The booking subsystem owns appointments; this adapter only implements
//! the narrow surface the monitor needs.

use crate::domain::appointment::{
    Appointment, AppointmentRepository, AppointmentStatus, CancellationNote,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::AppointmentId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct InMemoryAppointmentRepository {
    appointments: Mutex<HashMap<AppointmentId, Appointment>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self {
            appointments: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, appointment: Appointment) {
        let mut appointments = self.appointments.lock().unwrap();
        appointments.insert(appointment.id, appointment);
    }
}

impl Default for InMemoryAppointmentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn find_by_id(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        Ok(self.appointments.lock().unwrap().get(&id).cloned())
    }

    async fn find_confirmed_started(&self, now: DateTime<Utc>) -> Result<Vec<Appointment>> {
        let appointments = self.appointments.lock().unwrap();
        Ok(appointments
            .values()
            .filter(|a| a.status == AppointmentStatus::Confirmed && a.starts_at() <= now)
            .cloned()
            .collect())
    }

    async fn cancel_if_confirmed(
        &self,
        id: AppointmentId,
        note: &CancellationNote,
    ) -> Result<bool> {
        let mut appointments = self.appointments.lock().unwrap();
        let appointment = appointments
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("appointment {}", id)))?;

        if appointment.status != AppointmentStatus::Confirmed {
            return Ok(false);
        }

        appointment.status = AppointmentStatus::Cancelled;
        appointment.notes = Some(
            serde_json::to_string(note)
                .map_err(|e| DomainError::Internal(format!("notes payload: {}", e)))?,
        );
        appointment.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_refund_processed(&self, id: AppointmentId) -> Result<()> {
        let mut appointments = self.appointments.lock().unwrap();
        let appointment = appointments
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("appointment {}", id)))?;
        appointment.refund_processed = true;
        appointment.updated_at = Utc::now();
        Ok(())
    }
}
