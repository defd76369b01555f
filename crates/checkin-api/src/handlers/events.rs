//! Event and participant handlers

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::events::{AddParticipantRequest, CreateEventRequest};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Create an event owned by the caller
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "events",
    request_body = CreateEventRequest,
    responses(
        (status = 201, description = "Event created", body = checkin_core::Event),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Organizer or admin role required", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_event(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    let event = state.events.create_event(user.user_id, request).await?;

    Ok((StatusCode::CREATED, Json(event)))
}

/// Get an event
///
/// Public. The participant list is included when the caller is the event's
/// organizer or an admin.
#[utoipa::path(
    get,
    path = "/api/v1/events/{id}",
    tag = "events",
    params(
        ("id" = Uuid, Path, description = "Event ID")
    ),
    responses(
        (status = 200, description = "Event details", body = crate::events::EventDetails),
        (status = 404, description = "Event not found", body = crate::error::ApiError),
    )
)]
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = user.as_ref().map(|Extension(user)| user);
    let details = state.events.get_event(id, viewer).await?;

    Ok(Json(details))
}

/// Register a participant for an event
#[utoipa::path(
    post,
    path = "/api/v1/events/{id}/participants",
    tag = "events",
    params(
        ("id" = Uuid, Path, description = "Event ID")
    ),
    request_body = AddParticipantRequest,
    responses(
        (status = 201, description = "Participant added", body = checkin_core::Participant),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 403, description = "Not the event organizer", body = crate::error::ApiError),
        (status = 404, description = "Event not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn add_participant(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let participant = state
        .events
        .add_participant(id, user.user_id, user.is_admin(), request)
        .await?;

    Ok((StatusCode::CREATED, Json(participant)))
}
