//! Call signaling API handlers

use super::auth::request_identity;
use super::dto::ApiResponse;
use super::AppState;
use crate::application::signaling::{CallPhase, CallPlacement};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{RequestId, UserId};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub(super) fn domain_error_status(e: &DomainError) -> StatusCode {
    match e {
        DomainError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::InvalidTransition(_) => StatusCode::CONFLICT,
        DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
        DomainError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Start-call request body
#[derive(Debug, Deserialize)]
pub struct StartCallBody {
    pub callee_id: Uuid,
    pub call_type: String,
    pub duration_minutes: u32,
    pub estimated_cost: f64,
    pub currency: String,
}

/// Credentials and ids the caller's client needs to proceed
#[derive(Debug, Serialize, Deserialize)]
pub struct CallTicket {
    pub request_id: Uuid,
    pub session_id: Uuid,
    pub channel_name: String,
    pub transport_token: String,
    pub transport_participant_id: String,
    pub phase: CallPhase,
}

/// Start a call to an expert
pub async fn start_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartCallBody>,
) -> (StatusCode, Json<ApiResponse<CallTicket>>) {
    info!("API: Starting call to expert {}", body.callee_id);

    let call_type = match crate::domain::shared::value_objects::CallType::from_str(&body.call_type)
    {
        Some(call_type) => call_type,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(format!(
                    "unknown call type: {}",
                    body.call_type
                ))),
            );
        }
    };

    let placement = CallPlacement {
        callee_id: crate::domain::shared::value_objects::ExpertId::from_uuid(body.callee_id),
        call_type,
        duration_minutes: body.duration_minutes,
        estimated_cost: body.estimated_cost,
        currency: crate::domain::shared::value_objects::Currency::from_code(&body.currency),
    };

    let identity = request_identity(&headers);
    match state.coordinator.start_call(&identity, placement).await {
        Ok(started) => (
            StatusCode::OK,
            Json(ApiResponse::success(CallTicket {
                request_id: started.request.id.as_uuid(),
                session_id: started.session.id.as_uuid(),
                channel_name: started.session.credentials.channel_name,
                transport_token: started.session.credentials.transport_token,
                transport_participant_id: started.session.credentials.transport_participant_id,
                phase: *started.phases.borrow(),
            })),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Accept an incoming call (callee side)
pub async fn accept_call(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<CallTicket>>) {
    info!("API: Accepting call request {}", request_id);

    let identity = request_identity(&headers);
    match state
        .coordinator
        .accept_call(&identity, RequestId::from_uuid(request_id))
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(CallTicket {
                request_id,
                session_id: session.id.as_uuid(),
                channel_name: session.credentials.channel_name,
                transport_token: session.credentials.transport_token,
                transport_participant_id: session.credentials.transport_participant_id,
                phase: CallPhase::Connecting,
            })),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Decline an incoming call (callee side)
pub async fn decline_call(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<String>>) {
    info!("API: Declining call request {}", request_id);

    let identity = request_identity(&headers);
    match state
        .coordinator
        .decline_call(&identity, RequestId::from_uuid(request_id))
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success(format!(
                "request {} declined",
                request_id
            ))),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopCallResponse {
    pub duration_seconds: u64,
}

/// End the current call attempt
pub async fn stop_call(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<StopCallResponse>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    info!("API: Stopping call for caller {}", identity.id);
    match state
        .coordinator
        .stop_call(UserId::from_uuid(identity.id))
        .await
    {
        Ok(duration_seconds) => (
            StatusCode::OK,
            Json(ApiResponse::success(StopCallResponse { duration_seconds })),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Abandon a ringing attempt without touching the ledger
pub async fn cancel_call(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    match state.coordinator.cancel(UserId::from_uuid(identity.id)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse::success("call attempt cancelled".to_string())),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

/// Toggle the local microphone
pub async fn toggle_mute(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<ToggleResponse>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    match state
        .coordinator
        .toggle_mute(UserId::from_uuid(identity.id))
        .await
    {
        Ok(muted) => (
            StatusCode::OK,
            Json(ApiResponse::success(ToggleResponse { enabled: !muted })),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Toggle the local camera
pub async fn toggle_video(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<ToggleResponse>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    match state
        .coordinator
        .toggle_video(UserId::from_uuid(identity.id))
        .await
    {
        Ok(enabled) => (
            StatusCode::OK,
            Json(ApiResponse::success(ToggleResponse { enabled })),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Status snapshot of one call request, for devices without a live socket
pub async fn get_call_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> (
    StatusCode,
    Json<ApiResponse<crate::domain::call::request::CallRequest>>,
) {
    match state
        .ledger
        .get_request(RequestId::from_uuid(request_id))
        .await
    {
        Ok(Some(request)) => (StatusCode::OK, Json(ApiResponse::success(request))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!(
                "call request {} not found",
                request_id
            ))),
        ),
        Err(e) => (
            domain_error_status(&e),
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallStateResponse {
    pub phase: CallPhase,
    pub history: Vec<CallPhase>,
}

/// Current phase of the caller's attempt
pub async fn get_call_state(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<CallStateResponse>>) {
    let Some(identity) = super::auth::identity_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::error("authentication required".to_string())),
        );
    };

    let caller_id = UserId::from_uuid(identity.id);
    match (
        state.coordinator.phase(caller_id).await,
        state.coordinator.phase_history(caller_id).await,
    ) {
        (Some(phase), Some(history)) => (
            StatusCode::OK,
            Json(ApiResponse::success(CallStateResponse { phase, history })),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("no call attempt".to_string())),
        ),
    }
}
