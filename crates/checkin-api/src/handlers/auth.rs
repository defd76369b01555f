//! Authentication API handlers
//!
//! Provides HTTP endpoints for registration, the token lifecycle and
//! principal management.
//!
//! Author: hephaex@gmail.com

use crate::audit::AuditContext;
use crate::auth::{
    bearer_token, AuthenticatedUser, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Logout response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Register a new principal
///
/// New principals are organizers unless `role` is `staff`. Admin accounts
/// are created by operators, not through this endpoint.
///
/// # Responses
///
/// * `201 Created` - Principal registered, token pair issued
/// * `400 Bad Request` - Invalid email, empty name, weak password or role
/// * `409 Conflict` - Email already registered
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Principal registered", body = crate::auth::AuthResponse),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
        (status = 409, description = "Email already registered", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let response = state.auth.register(request, &context).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Login with email and password
///
/// Every credential failure returns the same `401 invalid credentials`.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = crate::auth::AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let response = state.auth.login(request, &context).await?;

    Ok(Json(response))
}

/// Rotate a refresh token
///
/// The presented refresh token is revoked and cannot be exchanged again.
/// If the current access token is sent as a bearer token it is revoked too.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = crate::auth::AuthResponse),
        (status = 401, description = "Invalid, expired or revoked refresh token", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let access_token = bearer_token(&headers).ok().flatten();
    let response = state.auth.refresh(request, access_token, &context).await?;

    Ok(Json(response))
}

/// Logout current session
///
/// Revokes the refresh token in the body and the bearer access token, if
/// one is sent. Expired tokens are accepted since they need no revocation.
///
/// # Responses
///
/// * `200 OK` - Logout successful
/// * `400 Bad Request` - Missing refresh token
/// * `401 Unauthorized` - Malformed, mismatched or already revoked token
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logout successful", body = LogoutResponse),
        (status = 400, description = "Missing refresh token", body = crate::error::ApiError),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let context = AuditContext::from_headers(&headers);
    let access_token = bearer_token(&headers)
        .map_err(|_| AppError::Unauthorized("invalid token".to_string()))?;

    state.auth.logout(access_token, request, &context).await?;

    Ok(Json(LogoutResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Get the current principal
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current principal", body = checkin_core::PrincipalPublic),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let principal = state.auth.get_principal(user.user_id).await?;

    Ok(Json(principal))
}

/// Soft-delete a principal (admin only)
///
/// The record is anonymized and the email becomes available again.
#[utoipa::path(
    delete,
    path = "/api/v1/principals/{id}",
    tag = "auth",
    params(
        ("id" = Uuid, Path, description = "Principal ID")
    ),
    responses(
        (status = 204, description = "Principal deleted"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Admin role required", body = crate::error::ApiError),
        (status = 404, description = "Principal not found", body = crate::error::ApiError),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn delete_principal_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.auth.delete_principal(id, user.user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_response_serialization() {
        let response = LogoutResponse {
            message: "Logged out".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("Logged out"));
    }
}
