//! Presence API handlers
//!
//! Presence is written only by the expert's own client (plus the sweep
//! job); everyone else reads.

use super::dto::ApiResponse;
use super::AppState;
use crate::domain::presence::{PresenceRecord, PresenceStatistics, PresenceStatus};
use crate::domain::shared::value_objects::ExpertId;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SetStatusBody {
    pub status: String,
    #[serde(default)]
    pub touch_activity: bool,
}

/// Upsert the calling expert's own status
pub async fn set_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SetStatusBody>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    let Some(status) = PresenceStatus::from_str(&body.status) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(format!(
                "unknown presence status: {}",
                body.status
            ))),
        );
    };

    let expert_id = ExpertId::from_uuid(identity.id);
    state
        .presence
        .set_status(expert_id, status, body.touch_activity);
    state
        .broadcaster
        .presence_changed(identity.id, status.as_str());

    info!("API: Presence for {} set to {}", expert_id, status.as_str());
    (
        StatusCode::OK,
        Json(ApiResponse::success(status.as_str().to_string())),
    )
}

/// Activity heartbeat: resets the idle clock and forces available
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    let expert_id = ExpertId::from_uuid(identity.id);
    state.presence.touch_activity(expert_id);
    state.broadcaster.presence_changed(
        identity.id,
        PresenceStatus::Available.as_str(),
    );

    (
        StatusCode::OK,
        Json(ApiResponse::success("activity recorded".to_string())),
    )
}

#[derive(Debug, Deserialize)]
pub struct AutoAwayBody {
    pub enabled: bool,
    pub timeout_minutes: u32,
}

/// Configure the calling expert's auto-away behavior
pub async fn configure_auto_away(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AutoAwayBody>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    state.presence.configure_auto_away(
        ExpertId::from_uuid(identity.id),
        body.enabled,
        body.timeout_minutes,
    );
    (
        StatusCode::OK,
        Json(ApiResponse::success("auto-away updated".to_string())),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub expert_id: Uuid,
    pub status: String,
    pub is_online: bool,
    pub last_activity_at: DateTime<Utc>,
}

impl From<PresenceRecord> for PresenceResponse {
    fn from(record: PresenceRecord) -> Self {
        Self {
            expert_id: record.expert_id.as_uuid(),
            status: record.status.as_str().to_string(),
            is_online: record.status.is_online(),
            last_activity_at: record.last_activity_at,
        }
    }
}

/// Read one expert's presence (cached, short TTL)
pub async fn get_presence(
    State(state): State<AppState>,
    Path(expert_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<PresenceResponse>>) {
    match state.presence.get_record(ExpertId::from_uuid(expert_id)) {
        Some(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(PresenceResponse::from(record))),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!(
                "no presence record for expert {}",
                expert_id
            ))),
        ),
    }
}

/// Presence summary statistics
pub async fn get_presence_stats(
    State(state): State<AppState>,
) -> Json<ApiResponse<PresenceStatistics>> {
    Json(ApiResponse::success(state.presence.statistics()))
}
