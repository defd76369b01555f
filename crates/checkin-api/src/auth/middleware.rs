//! Authentication gate for protected routes
//!
//! Extracts the bearer token, verifies it, rejects refresh tokens and revoked
//! tokens, and attaches [`AuthenticatedUser`] to the request extensions.
//! A revocation store failure rejects the request; it is never read as
//! "not revoked".

use super::jwt::{parse_and_verify, Claims, JwtConfig, JwtError, TokenKind};
use super::revocation::RevocationStore;
use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use checkin_core::Role;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identity established by the gate
///
/// Extract in handlers with `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    /// Role copied from the token at issuance
    pub role: String,
    /// Token ID, for correlating audit records
    pub jti: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    /// Parsed role, `None` if the token carries an unknown role
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: claims.subject_id().map_err(|_| AuthError::InvalidToken)?,
            role: claims.role,
            jti: claims.jti,
        })
    }
}

/// Authentication gate errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("invalid token type")]
    InvalidTokenType,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("revocation check failed: {0}")]
    RevocationUnavailable(String),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::ExpiredToken => AuthError::ExpiredToken,
            _ => AuthError::InvalidToken,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AuthError::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                ApiError::new("FORBIDDEN", self.to_string()),
            ),
            AuthError::RevocationUnavailable(detail) => {
                tracing::error!(error = %detail, "Failing closed on revocation check");
                (StatusCode::INTERNAL_SERVER_ERROR, ApiError::internal_error())
            }
            _ => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("UNAUTHORIZED", self.to_string()),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Per-request token verification
#[derive(Clone)]
pub struct AuthGate {
    jwt_config: JwtConfig,
    revocations: Arc<dyn RevocationStore>,
}

impl AuthGate {
    pub fn new(jwt_config: JwtConfig, revocations: Arc<dyn RevocationStore>) -> Self {
        Self {
            jwt_config,
            revocations,
        }
    }

    /// Authenticate a request from its headers
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AuthError> {
        let token = bearer_token(headers)?.ok_or(AuthError::MissingToken)?;
        self.verify_access_token(token).await
    }

    /// Verify an access token: signature and expiry, kind, then revocation
    pub async fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = parse_and_verify(&self.jwt_config, token)?;

        if claims.token_type != TokenKind::Access {
            return Err(AuthError::InvalidTokenType);
        }

        let revoked = self
            .revocations
            .is_revoked(token)
            .await
            .map_err(|e| AuthError::RevocationUnavailable(e.to_string()))?;
        if revoked {
            return Err(AuthError::TokenRevoked);
        }

        AuthenticatedUser::try_from(claims)
    }
}

/// Bearer token from the Authorization header
///
/// `Ok(None)` when the header is absent; a header with another scheme or an
/// empty token is treated as missing.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    Ok(Some(token))
}

/// Authentication middleware that requires a valid access token
///
/// # Usage
///
/// ```ignore
/// let app = Router::new()
///     .route("/protected", get(protected_handler))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    match state.gate.authenticate(request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(e) => {
            if !matches!(e, AuthError::MissingToken) {
                audit_log(&AuditEvent::InvalidToken {
                    reason: e.to_string(),
                    context: AuditContext::from_headers(request.headers()),
                });
            }
            Err(e)
        }
    }
}

/// Optional authentication middleware
///
/// Never rejects. Attaches the user only when a valid, unrevoked access token
/// is present, so handlers see `Option<Extension<AuthenticatedUser>>`.
pub async fn optional_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Ok(user) = state.gate.authenticate(request.headers()).await {
        request.extensions_mut().insert(user);
    }

    next.run(request).await
}

/// Type alias for role middleware future
type RoleMiddlewareFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AuthError>> + Send>>;

/// Middleware factory for role-based access control
///
/// Must be layered inside [`auth_middleware`]. A missing identity or a role
/// outside the allow-list is `Forbidden`; admins get no implicit bypass, so
/// include `Role::Admin` in the list where admins should pass.
///
/// ```ignore
/// let app = Router::new()
///     .route("/events", post(create_event))
///     .route_layer(middleware::from_fn(require_role(&[Role::Organizer, Role::Admin])))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub fn require_role(
    allowed: &'static [Role],
) -> impl Fn(Request<Body>, Next) -> RoleMiddlewareFuture + Clone {
    move |request: Request<Body>, next: Next| {
        Box::pin(async move {
            let denied = {
                let user = request.extensions().get::<AuthenticatedUser>();
                let permitted = user
                    .and_then(AuthenticatedUser::role)
                    .is_some_and(|role| allowed.contains(&role));
                (!permitted).then(|| user.map(|u| u.user_id))
            };

            if let Some(user_id) = denied {
                audit_log(&AuditEvent::AccessDenied {
                    user_id,
                    resource: request.uri().path().to_string(),
                    required_roles: Some(
                        allowed
                            .iter()
                            .map(Role::as_str)
                            .collect::<Vec<_>>()
                            .join(","),
                    ),
                    context: AuditContext::from_headers(request.headers()),
                });
                return Err(AuthError::InsufficientPermissions);
            }

            Ok(next.run(request).await)
        })
    }
}
