//! Security audit logging
//!
//! Authentication, authorization and check-in events are emitted through
//! `tracing` on the dedicated `audit` target so they can be filtered and
//! routed separately from application logs. Each record carries the event
//! serialized as JSON plus a handful of indexed fields.
//!
//! Passwords and raw tokens never appear in audit events.
//!
//! ```ignore
//! use checkin_api::audit::{audit_log, AuditContext, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id,
//!     email: "a@x.com".to_string(),
//!     context: AuditContext::default(),
//! });
//! ```

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Request metadata attached to audit events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Security audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    RegistrationSuccess {
        user_id: Uuid,
        email: String,
        role: String,
        context: AuditContext,
    },

    RegistrationFailure {
        email: String,
        reason: String,
        context: AuditContext,
    },

    LoginSuccess {
        user_id: Uuid,
        email: String,
        context: AuditContext,
    },

    /// Reason is recorded server-side only; the caller always sees the
    /// generic credential message
    LoginFailure {
        email: String,
        reason: String,
        context: AuditContext,
    },

    TokenRefresh {
        user_id: Uuid,
        context: AuditContext,
    },

    /// A refresh token was presented after it had already been exchanged
    RefreshTokenReuse {
        user_id: Option<Uuid>,
        token_id: String,
        context: AuditContext,
    },

    Logout {
        user_id: Option<Uuid>,
        revoked_tokens: usize,
        context: AuditContext,
    },

    InvalidToken {
        reason: String,
        context: AuditContext,
    },

    AccessDenied {
        user_id: Option<Uuid>,
        resource: String,
        required_roles: Option<String>,
        context: AuditContext,
    },

    PrincipalDeleted {
        user_id: Uuid,
        deleted_by: Uuid,
    },

    CheckIn {
        check_in_id: Uuid,
        event_id: Uuid,
        participant_id: Uuid,
        method: String,
        actor_id: Uuid,
    },

    DuplicateCheckIn {
        event_id: Uuid,
        participant_id: Uuid,
        actor_id: Uuid,
    },

    CheckInCancelled {
        check_in_id: Uuid,
        actor_id: Uuid,
    },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::RegistrationSuccess { .. } => "Registration successful",
            AuditEvent::RegistrationFailure { .. } => "Registration failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::TokenRefresh { .. } => "Token refreshed",
            AuditEvent::RefreshTokenReuse { .. } => "Revoked refresh token presented",
            AuditEvent::Logout { .. } => "Logout",
            AuditEvent::InvalidToken { .. } => "Invalid token presented",
            AuditEvent::AccessDenied { .. } => "Access denied",
            AuditEvent::PrincipalDeleted { .. } => "Principal deleted",
            AuditEvent::CheckIn { .. } => "Participant checked in",
            AuditEvent::DuplicateCheckIn { .. } => "Duplicate check-in rejected",
            AuditEvent::CheckInCancelled { .. } => "Check-in cancelled",
        }
    }

    /// Events that may indicate an attack are raised to WARN
    fn is_suspicious(&self) -> bool {
        matches!(
            self,
            AuditEvent::RefreshTokenReuse { .. } | AuditEvent::AccessDenied { .. }
        )
    }

    fn user_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::RegistrationSuccess { user_id, .. }
            | AuditEvent::LoginSuccess { user_id, .. }
            | AuditEvent::TokenRefresh { user_id, .. }
            | AuditEvent::PrincipalDeleted { user_id, .. } => Some(*user_id),
            AuditEvent::RefreshTokenReuse { user_id, .. }
            | AuditEvent::Logout { user_id, .. }
            | AuditEvent::AccessDenied { user_id, .. } => *user_id,
            AuditEvent::CheckIn { actor_id, .. }
            | AuditEvent::DuplicateCheckIn { actor_id, .. }
            | AuditEvent::CheckInCancelled { actor_id, .. } => Some(*actor_id),
            AuditEvent::RegistrationFailure { .. }
            | AuditEvent::LoginFailure { .. }
            | AuditEvent::InvalidToken { .. } => None,
        }
    }

    fn context(&self) -> Option<&AuditContext> {
        match self {
            AuditEvent::RegistrationSuccess { context, .. }
            | AuditEvent::RegistrationFailure { context, .. }
            | AuditEvent::LoginSuccess { context, .. }
            | AuditEvent::LoginFailure { context, .. }
            | AuditEvent::TokenRefresh { context, .. }
            | AuditEvent::RefreshTokenReuse { context, .. }
            | AuditEvent::Logout { context, .. }
            | AuditEvent::InvalidToken { context, .. }
            | AuditEvent::AccessDenied { context, .. } => Some(context),
            AuditEvent::PrincipalDeleted { .. }
            | AuditEvent::CheckIn { .. }
            | AuditEvent::DuplicateCheckIn { .. }
            | AuditEvent::CheckInCancelled { .. } => None,
        }
    }
}

/// Log a security audit event on the `audit` target
///
/// Example output with the JSON formatter:
///
/// ```json
/// {
///   "target": "audit",
///   "fields": {
///     "message": "Login successful",
///     "timestamp": "2026-03-01T10:30:00Z",
///     "event": "{\"event_type\":\"login_success\", ...}",
///     "user_id": "550e8400-e29b-41d4-a716-446655440000",
///     "ip_address": "Some(\"192.168.1.1\")"
///   }
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp: DateTime<Utc> = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    let user_id = event.user_id();
    let ip_address = event.context().and_then(|c| c.ip_address.as_deref());

    if event.is_suspicious() {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            user_id = ?user_id,
            ip_address = ?ip_address,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            user_id = ?user_id,
            ip_address = ?ip_address,
            "{}",
            event.summary()
        );
    }
}

/// Client IP from X-Forwarded-For (first hop) or X-Real-IP
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let first_ip = first_ip.trim();
        if !first_ip.is_empty() {
            return Some(first_ip.to_string());
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
