//! PostgreSQL store
//!
//! Implements the repository traits with SQLx. Every round trip runs under the
//! configured store deadline, and constraint violations are translated into
//! [`CheckinError::Conflict`] / [`CheckinError::NotFound`] so services never see
//! driver errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use crate::repository::{CheckInRepository, EventRepository, PrincipalRepository};
use crate::{
    anonymized_identity, is_reserved_email, normalize_email, with_deadline, CheckIn, CheckinError,
    Event, NewCheckIn, NewEvent, NewParticipant, NewPrincipal, Participant, Principal,
    PrincipalPublic, Result,
};

/// Database schema applied by [`PgStore::migrate`]
pub const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// PostgreSQL store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    /// Create a new store connection
    pub async fn connect(database_url: &str, pool_size: u32, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(timeout)
            .connect(database_url)
            .await
            .map_err(|e| CheckinError::Database(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool, timeout })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema (idempotent)
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckinError::Database(format!("Failed to apply schema: {e}")))?;
        Ok(())
    }

    /// Cheap connectivity probe for readiness checks
    pub async fn ping(&self) -> Result<()> {
        with_deadline(self.timeout, async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Ping failed", e))?;
            Ok(())
        })
        .await
    }
}

/// Translate a driver error, keeping constraint violations distinguishable
fn db_error(context: &str, err: sqlx::Error) -> CheckinError {
    CheckinError::Database(format!("{context}: {err}"))
}

fn write_error(context: &str, conflict: &str, err: sqlx::Error) -> CheckinError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return CheckinError::Conflict(conflict.to_string());
        }
        if db_err.is_foreign_key_violation() {
            return CheckinError::NotFound("referenced record".to_string());
        }
    }
    db_error(context, err)
}

// ============================================================================
// Principals
// ============================================================================

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: Uuid,
    email: String,
    password_hash: String,
    name: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
    is_anonymized: bool,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = CheckinError;

    fn try_from(row: PrincipalRow) -> Result<Self> {
        Ok(Principal {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            role: row
                .role
                .parse()
                .map_err(|_| CheckinError::Database(format!("Corrupt role for {}", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
            is_anonymized: row.is_anonymized,
        })
    }
}

const PRINCIPAL_COLUMNS: &str = "id, email, password_hash, name, role, created_at, updated_at, \
                                 deleted_at, deleted_by, is_anonymized";

#[async_trait]
impl PrincipalRepository for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalPublic>> {
        Ok(self
            .find_by_email_with_password(email)
            .await?
            .map(|p| p.to_public()))
    }

    async fn find_by_email_with_password(&self, email: &str) -> Result<Option<Principal>> {
        let email = normalize_email(email);
        with_deadline(self.timeout, async {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {PRINCIPAL_COLUMNS} FROM principals \
                 WHERE LOWER(email) = $1 AND deleted_at IS NULL"
            ))
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch principal", e))?;

            row.map(Principal::try_from).transpose()
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PrincipalPublic>> {
        with_deadline(self.timeout, async {
            let row: Option<PrincipalRow> = sqlx::query_as(&format!(
                "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1 AND deleted_at IS NULL"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch principal", e))?;

            Ok(row
                .map(Principal::try_from)
                .transpose()?
                .map(|p| p.to_public()))
        })
        .await
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        with_deadline(self.timeout, async {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM principals WHERE LOWER(email) = $1)",
            )
            .bind(&email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to check existing principal", e))
        })
        .await
    }

    async fn create(&self, principal: NewPrincipal) -> Result<PrincipalPublic> {
        if is_reserved_email(&principal.email) {
            return Err(CheckinError::Validation("email domain is reserved".to_string()));
        }
        with_deadline(self.timeout, async {
            let row: PrincipalRow = sqlx::query_as(&format!(
                "INSERT INTO principals (id, email, password_hash, name, role) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING {PRINCIPAL_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(normalize_email(&principal.email))
            .bind(&principal.password_hash)
            .bind(&principal.name)
            .bind(principal.role.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error("Failed to create principal", "email already registered", e))?;

            Ok(Principal::try_from(row)?.to_public())
        })
        .await
    }

    async fn soft_delete(&self, id: Uuid, deleted_by: Uuid) -> Result<()> {
        let (email, name) = anonymized_identity(id);
        with_deadline(self.timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE principals
                SET email = $2, name = $3, deleted_at = NOW(), deleted_by = $4,
                    is_anonymized = TRUE, updated_at = NOW()
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(id)
            .bind(&email)
            .bind(&name)
            .bind(deleted_by)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                write_error("Failed to delete principal", "anonymized email already in use", e)
            })?;

            if result.rows_affected() == 0 {
                return Err(CheckinError::NotFound("principal".to_string()));
            }
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Events and Participants
// ============================================================================

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: Uuid,
    name: String,
    starts_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            organizer_id: row.organizer_id,
            name: row.name,
            starts_at: row.starts_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    email: Option<String>,
    qr_code: String,
    created_at: DateTime<Utc>,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            email: row.email,
            qr_code: row.qr_code,
            created_at: row.created_at,
        }
    }
}

const PARTICIPANT_COLUMNS: &str = "id, event_id, name, email, qr_code, created_at";

#[async_trait]
impl EventRepository for PgStore {
    async fn create_event(&self, event: NewEvent) -> Result<Event> {
        with_deadline(self.timeout, async {
            let row: EventRow = sqlx::query_as(
                r#"
                INSERT INTO events (id, organizer_id, name, starts_at)
                VALUES ($1, $2, $3, $4)
                RETURNING id, organizer_id, name, starts_at, created_at
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(event.organizer_id)
            .bind(&event.name)
            .bind(event.starts_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error("Failed to create event", "event already exists", e))?;

            Ok(row.into())
        })
        .await
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>> {
        with_deadline(self.timeout, async {
            let row: Option<EventRow> = sqlx::query_as(
                "SELECT id, organizer_id, name, starts_at, created_at FROM events WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch event", e))?;

            Ok(row.map(Event::from))
        })
        .await
    }

    async fn create_participant(&self, participant: NewParticipant) -> Result<Participant> {
        with_deadline(self.timeout, async {
            let row: ParticipantRow = sqlx::query_as(&format!(
                "INSERT INTO participants (id, event_id, name, email, qr_code) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING {PARTICIPANT_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(participant.event_id)
            .bind(&participant.name)
            .bind(&participant.email)
            .bind(&participant.qr_code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                write_error("Failed to create participant", "QR code already in use", e)
            })?;

            Ok(row.into())
        })
        .await
    }

    async fn find_participant(&self, id: Uuid) -> Result<Option<Participant>> {
        with_deadline(self.timeout, async {
            let row: Option<ParticipantRow> = sqlx::query_as(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch participant", e))?;

            Ok(row.map(Participant::from))
        })
        .await
    }

    async fn find_participant_in_event(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<Participant>> {
        with_deadline(self.timeout, async {
            let row: Option<ParticipantRow> = sqlx::query_as(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 AND id = $2"
            ))
            .bind(event_id)
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch participant", e))?;

            Ok(row.map(Participant::from))
        })
        .await
    }

    async fn find_participant_by_qr(
        &self,
        event_id: Uuid,
        qr_code: &str,
    ) -> Result<Option<Participant>> {
        with_deadline(self.timeout, async {
            let row: Option<ParticipantRow> = sqlx::query_as(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants \
                 WHERE event_id = $1 AND qr_code = $2"
            ))
            .bind(event_id)
            .bind(qr_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch participant", e))?;

            Ok(row.map(Participant::from))
        })
        .await
    }

    async fn list_participants(&self, event_id: Uuid) -> Result<Vec<Participant>> {
        with_deadline(self.timeout, async {
            let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants \
                 WHERE event_id = $1 ORDER BY created_at"
            ))
            .bind(event_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list participants", e))?;

            Ok(rows.into_iter().map(Participant::from).collect())
        })
        .await
    }
}

// ============================================================================
// Check-ins
// ============================================================================

#[derive(Debug, FromRow)]
struct CheckInRow {
    id: Uuid,
    event_id: Uuid,
    participant_id: Uuid,
    method: String,
    checked_in_by: Option<Uuid>,
    device_info: Option<String>,
    checked_in_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<Uuid>,
}

impl TryFrom<CheckInRow> for CheckIn {
    type Error = CheckinError;

    fn try_from(row: CheckInRow) -> Result<Self> {
        Ok(CheckIn {
            id: row.id,
            event_id: row.event_id,
            participant_id: row.participant_id,
            method: row
                .method
                .parse()
                .map_err(|_| CheckinError::Database(format!("Corrupt method for {}", row.id)))?,
            checked_in_by: row.checked_in_by,
            device_info: row.device_info,
            checked_in_at: row.checked_in_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by,
        })
    }
}

const CHECK_IN_COLUMNS: &str = "id, event_id, participant_id, method, checked_in_by, device_info, \
                                checked_in_at, cancelled_at, cancelled_by";

#[async_trait]
impl CheckInRepository for PgStore {
    async fn insert(&self, check_in: NewCheckIn) -> Result<CheckIn> {
        with_deadline(self.timeout, async {
            // No pre-check: check_ins_active_key arbitrates concurrent inserts
            let row: CheckInRow = sqlx::query_as(&format!(
                "INSERT INTO check_ins (id, event_id, participant_id, method, checked_in_by, device_info) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING {CHECK_IN_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(check_in.event_id)
            .bind(check_in.participant_id)
            .bind(check_in.method.as_str())
            .bind(check_in.checked_in_by)
            .bind(&check_in.device_info)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                write_error(
                    "Failed to record check-in",
                    "participant is already checked in for this event",
                    e,
                )
            })?;

            CheckIn::try_from(row)
        })
        .await
    }

    async fn find(&self, id: Uuid) -> Result<Option<CheckIn>> {
        with_deadline(self.timeout, async {
            let row: Option<CheckInRow> = sqlx::query_as(&format!(
                "SELECT {CHECK_IN_COLUMNS} FROM check_ins WHERE id = $1"
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch check-in", e))?;

            row.map(CheckIn::try_from).transpose()
        })
        .await
    }

    async fn find_active_for_participant(&self, participant_id: Uuid) -> Result<Option<CheckIn>> {
        with_deadline(self.timeout, async {
            let row: Option<CheckInRow> = sqlx::query_as(&format!(
                "SELECT {CHECK_IN_COLUMNS} FROM check_ins \
                 WHERE participant_id = $1 AND cancelled_at IS NULL \
                 ORDER BY checked_in_at DESC LIMIT 1"
            ))
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to fetch check-in status", e))?;

            row.map(CheckIn::try_from).transpose()
        })
        .await
    }

    async fn cancel(&self, id: Uuid, cancelled_by: Uuid) -> Result<()> {
        with_deadline(self.timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE check_ins
                SET cancelled_at = NOW(), cancelled_by = $2
                WHERE id = $1 AND cancelled_at IS NULL
                "#,
            )
            .bind(id)
            .bind(cancelled_by)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to cancel check-in", e))?;

            if result.rows_affected() == 0 {
                return Err(CheckinError::NotFound("check-in".to_string()));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_enforces_active_check_in_uniqueness() {
        assert!(SCHEMA.contains("check_ins_active_key"));
        assert!(SCHEMA.contains("WHERE cancelled_at IS NULL"));
        assert!(SCHEMA.contains("principals_email_key"));
    }

    #[test]
    fn test_principal_row_with_unknown_role_is_rejected() {
        let now = Utc::now();
        let row = PrincipalRow {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            password_hash: "hash".to_string(),
            name: "A".to_string(),
            role: "superuser".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            is_anonymized: false,
        };

        assert!(matches!(
            Principal::try_from(row),
            Err(CheckinError::Database(_))
        ));
    }

    #[test]
    fn test_check_in_row_conversion() {
        let row = CheckInRow {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            method: "manual".to_string(),
            checked_in_by: Some(Uuid::new_v4()),
            device_info: Some("gate-2".to_string()),
            checked_in_at: Utc::now(),
            cancelled_at: None,
            cancelled_by: None,
        };

        let check_in = CheckIn::try_from(row).unwrap();
        assert_eq!(check_in.method, crate::CheckInMethod::Manual);
        assert!(check_in.is_active());
    }
}
