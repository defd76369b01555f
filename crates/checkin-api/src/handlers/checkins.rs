//! Check-in handlers
//!
//! Author: hephaex@gmail.com

use crate::auth::AuthenticatedUser;
use crate::checkin::CheckInRequest;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Check a participant in
///
/// # Responses
///
/// * `200 OK` - Checked in
/// * `403 Forbidden` - Caller does not manage the event
/// * `404 Not Found` - Unknown event or participant
/// * `409 Conflict` - Participant is already checked in
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/checkins",
    tag = "checkins",
    params(
        ("id" = Uuid, Path, description = "Event ID")
    ),
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Checked in", body = checkin_core::CheckIn),
        (status = 400, description = "Invalid participant reference", body = crate::error::ApiError),
        (status = 403, description = "Not the event organizer", body = crate::error::ApiError),
        (status = 404, description = "Event or participant not found", body = crate::error::ApiError),
        (status = 409, description = "Already checked in", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(event_id): Path<Uuid>,
    Json(request): Json<CheckInRequest>,
) -> Result<impl IntoResponse, AppError> {
    let check_in = state
        .checkins
        .check_in(
            event_id,
            user.user_id,
            user.is_admin(),
            request.method,
            &request.participant_ref,
            request.device_info,
        )
        .await?;

    Ok(Json(check_in))
}

/// Cancel a check-in
#[utoipa::path(
    delete,
    path = "/api/v1/checkins/{id}",
    tag = "checkins",
    params(
        ("id" = Uuid, Path, description = "Check-in ID")
    ),
    responses(
        (status = 204, description = "Check-in cancelled"),
        (status = 403, description = "Not the event organizer", body = crate::error::ApiError),
        (status = 404, description = "No active check-in with this id", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn cancel_check_in(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state
        .checkins
        .cancel(id, user.user_id, user.is_admin())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Check-in status of a participant
#[utoipa::path(
    get,
    path = "/api/v1/participants/{id}/checkin-status",
    tag = "checkins",
    params(
        ("id" = Uuid, Path, description = "Participant ID")
    ),
    responses(
        (status = 200, description = "Current status", body = crate::checkin::CheckInStatus),
        (status = 404, description = "Participant not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn checkin_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.checkins.get_status(id).await?;

    Ok(Json(status))
}
