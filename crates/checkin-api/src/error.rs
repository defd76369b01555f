//! API error handling
//!
//! Author: hephaex@gmail.com

use crate::auth::revocation::RevocationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use checkin_core::CheckinError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Message returned for every server-side failure
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// API error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal_error() -> Self {
        Self::new("INTERNAL_ERROR", INTERNAL_ERROR_MESSAGE)
    }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) | AppError::Database(_) | AppError::Timeout(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            AppError::BadRequest(msg) => ApiError::new("BAD_REQUEST", msg),
            AppError::Unauthorized(msg) => ApiError::new("UNAUTHORIZED", msg),
            AppError::Forbidden(msg) => ApiError::new("FORBIDDEN", msg),
            AppError::NotFound(_) => ApiError::new("NOT_FOUND", self.to_string()),
            AppError::Conflict(msg) => ApiError::new("CONFLICT", msg),
            AppError::Internal(_) | AppError::Database(_) | AppError::Timeout(_) => {
                // Full detail stays in the server log
                tracing::error!(error = %self, "Request failed");
                ApiError::internal_error()
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<CheckinError> for AppError {
    fn from(err: CheckinError) -> Self {
        match err {
            CheckinError::Validation(msg) => AppError::BadRequest(msg),
            CheckinError::Unauthorized(msg) => AppError::Unauthorized(msg),
            CheckinError::Forbidden(msg) => AppError::Forbidden(msg),
            CheckinError::Conflict(msg) => AppError::Conflict(msg),
            CheckinError::NotFound(msg) => AppError::NotFound(msg),
            CheckinError::Database(msg) => AppError::Database(msg),
            CheckinError::Timeout(after) => AppError::Timeout(after),
            CheckinError::Config(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            CheckinError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RevocationError> for AppError {
    fn from(err: RevocationError) -> Self {
        match err {
            RevocationError::Timeout(after) => AppError::Timeout(after),
            other => AppError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_core_error_mapping() {
        let cases = [
            (CheckinError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (CheckinError::Unauthorized("no".into()), StatusCode::UNAUTHORIZED),
            (CheckinError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (CheckinError::NotFound("event".into()), StatusCode::NOT_FOUND),
            (CheckinError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                CheckinError::Timeout(Duration::from_secs(1)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status(), expected);
        }
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_leaked() {
        let response =
            AppError::Database("relation \"principals\" does not exist".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert_eq!(json["message"], INTERNAL_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_not_found_message() {
        let json = body_json(AppError::NotFound("participant".into()).into_response()).await;
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "participant not found");
    }
}
