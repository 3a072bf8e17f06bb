//! Appointment no-show API handlers

use super::calls_handler::domain_error_status;
use super::dto::ApiResponse;
use super::AppState;
use crate::application::no_show::NoShowState;
use crate::domain::shared::value_objects::AppointmentId;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::info;
use uuid::Uuid;

/// No-show query for one appointment
pub async fn get_no_show_state(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<NoShowState>>) {
    match state
        .monitor
        .no_show_state(AppointmentId::from_uuid(appointment_id))
        .await
    {
        Ok(no_show) => (StatusCode::OK, Json(ApiResponse::success(no_show))),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Record the calling expert's join for an appointment. First join wins;
/// replays are acknowledged but change nothing.
pub async fn record_expert_join(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    info!(
        "API: Expert {} joined appointment {}",
        identity.id, appointment_id
    );
    let first = state
        .monitor
        .record_expert_join(AppointmentId::from_uuid(appointment_id));

    (
        StatusCode::OK,
        Json(ApiResponse::success(if first {
            "join recorded".to_string()
        } else {
            "join already recorded".to_string()
        })),
    )
}
