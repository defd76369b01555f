//! Check-in Core - Domain models, storage traits, and shared types
//!
//! This crate defines the core abstractions used throughout the check-in platform:
//! - Principals (organizers, admins, staff) and their roles
//! - Events, participants and check-in records
//! - Common error types
//! - Repository traits with PostgreSQL and in-memory adapters
//! - Configuration management

pub mod config;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, RevocationBackend};
pub use memory::InMemoryStore;
pub use postgres::PgStore;
pub use repository::{CheckInRepository, EventRepository, PrincipalRepository};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for check-in operations
#[derive(Error, Debug)]
pub enum CheckinError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CheckinError>;

/// Run a store operation under a deadline
///
/// An elapsed deadline surfaces as [`CheckinError::Timeout`]; the operation is
/// not retried.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(CheckinError::Timeout(deadline)),
    }
}

/// Normalize an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ============================================================================
// Principals
// ============================================================================

/// Principal role
///
/// Closed set of roles a principal can hold:
/// - Organizer: Creates events and manages their participants
/// - Admin: Full access to every event and principal
/// - Staff: Authenticated helper without event ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Organizer,
    Admin,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Organizer => "organizer",
            Role::Admin => "admin",
            Role::Staff => "staff",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = CheckinError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "organizer" => Ok(Role::Organizer),
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            other => Err(CheckinError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Principal account including its password hash
///
/// Only returned by credential lookups. Everything that leaves the service
/// goes through [`Principal::to_public`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    pub is_anonymized: bool,
}

impl Principal {
    /// Whether the principal has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Convert to the public representation (no password hash)
    pub fn to_public(&self) -> PrincipalPublic {
        PrincipalPublic {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public principal representation (safe for API responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PrincipalPublic {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to persist a new principal
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: Role,
}

/// Mail domain of anonymization placeholders; no principal may register in it
pub const ANONYMIZED_EMAIL_DOMAIN: &str = "anonymized.invalid";

/// Placeholder values written over a soft-deleted principal
///
/// The email embeds the principal id so every placeholder is unique. Its
/// domain is reserved (see [`is_reserved_email`]), so it can never collide
/// with a registered address.
pub fn anonymized_identity(principal_id: Uuid) -> (String, String) {
    (
        format!("deleted+{}@{ANONYMIZED_EMAIL_DOMAIN}", principal_id.simple()),
        "Deleted User".to_string(),
    )
}

/// Whether an address falls in the reserved placeholder domain or below it
pub fn is_reserved_email(email: &str) -> bool {
    let email = normalize_email(email);
    let Some((_, domain)) = email.rsplit_once('@') else {
        return false;
    };
    let domain = domain.trim_end_matches('.');
    domain == ANONYMIZED_EMAIL_DOMAIN
        || domain
            .strip_suffix(ANONYMIZED_EMAIL_DOMAIN)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

// ============================================================================
// Events and Participants
// ============================================================================

/// Event owned by an organizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Whether the actor may manage this event
    pub fn is_managed_by(&self, actor_id: Uuid, is_admin: bool) -> bool {
        is_admin || self.organizer_id == actor_id
    }
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub organizer_id: Uuid,
    pub name: String,
    pub starts_at: Option<DateTime<Utc>>,
}

/// Participant registered for an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Opaque value encoded into the participant's QR code
    pub qr_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub event_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub qr_code: String,
}

// ============================================================================
// Check-ins
// ============================================================================

/// How a participant was checked in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CheckInMethod {
    QrCode,
    Manual,
}

impl CheckInMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInMethod::QrCode => "qrcode",
            CheckInMethod::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CheckInMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CheckInMethod {
    type Err = CheckinError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qrcode" => Ok(CheckInMethod::QrCode),
            "manual" => Ok(CheckInMethod::Manual),
            other => Err(CheckinError::Validation(format!(
                "unknown check-in method: {other}"
            ))),
        }
    }
}

/// A check-in record
///
/// At most one active (not cancelled) record exists per (event, participant);
/// the storage layer enforces this with a uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckIn {
    pub id: Uuid,
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub method: CheckInMethod,
    /// Staff member who performed a manual check-in; `None` for QR scans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_in_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<String>,
    pub checked_in_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<Uuid>,
}

impl CheckIn {
    pub fn is_active(&self) -> bool {
        self.cancelled_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub method: CheckInMethod,
    pub checked_in_by: Option<Uuid>,
    pub device_info: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("organizer".parse::<Role>().unwrap(), Role::Organizer);
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" staff ".parse::<Role>().unwrap(), Role::Staff);
        assert!(matches!(
            "viewer".parse::<Role>(),
            Err(CheckinError::Validation(_))
        ));
    }

    #[test]
    fn test_check_in_method_parse() {
        assert_eq!("qrcode".parse::<CheckInMethod>().unwrap(), CheckInMethod::QrCode);
        assert_eq!("Manual".parse::<CheckInMethod>().unwrap(), CheckInMethod::Manual);
        assert!("nfc".parse::<CheckInMethod>().is_err());
        assert_eq!(CheckInMethod::QrCode.to_string(), "qrcode");
    }

    #[test]
    fn test_check_in_method_serde() {
        let json = serde_json::to_string(&CheckInMethod::QrCode).unwrap();
        assert_eq!(json, "\"qrcode\"");
        let method: CheckInMethod = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(method, CheckInMethod::Manual);
    }

    #[test]
    fn test_anonymized_identity_is_unique_per_principal() {
        let (email_a, name_a) = anonymized_identity(Uuid::new_v4());
        let (email_b, _) = anonymized_identity(Uuid::new_v4());

        assert_ne!(email_a, email_b);
        assert!(email_a.ends_with("@anonymized.invalid"));
        assert_eq!(name_a, "Deleted User");
        assert!(is_reserved_email(&email_a));
    }

    #[test]
    fn test_reserved_email_domain() {
        assert!(is_reserved_email("deleted+abc@anonymized.invalid"));
        assert!(is_reserved_email("  Someone@ANONYMIZED.Invalid "));
        assert!(is_reserved_email("x@mail.anonymized.invalid"));
        assert!(is_reserved_email("x@anonymized.invalid."));
        assert!(!is_reserved_email("x@notanonymized.invalid"));
        assert!(!is_reserved_email("anonymized.invalid@example.com"));
        assert!(!is_reserved_email("a@x.com"));
        assert!(!is_reserved_email("no-at-sign"));
    }

    #[test]
    fn test_principal_to_public_strips_hash() {
        let now = Utc::now();
        let principal = Principal {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            name: "A".to_string(),
            role: Role::Organizer,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            is_anonymized: false,
        };

        let json = serde_json::to_string(&principal.to_public()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"role\":\"organizer\""));
    }

    #[test]
    fn test_event_is_managed_by() {
        let organizer = Uuid::new_v4();
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: organizer,
            name: "Launch".to_string(),
            starts_at: None,
            created_at: Utc::now(),
        };

        assert!(event.is_managed_by(organizer, false));
        assert!(event.is_managed_by(Uuid::new_v4(), true));
        assert!(!event.is_managed_by(Uuid::new_v4(), false));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<()> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(CheckinError::Timeout(_))));
    }

    #[test]
    fn test_with_deadline_passes_result_through() {
        let result = tokio_test::block_on(with_deadline(Duration::from_secs(1), async { Ok(7) }));
        assert_eq!(result.unwrap(), 7);
    }
}
