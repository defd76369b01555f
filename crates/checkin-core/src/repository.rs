//! Storage capability traits
//!
//! Services depend on these traits, never on a concrete store. Adapters:
//! - [`crate::PgStore`]: PostgreSQL via SQLx
//! - [`crate::InMemoryStore`]: process-local maps for development and tests
//!
//! Uniqueness (principal email, active check-in per event and participant)
//! is enforced inside the adapter and reported as [`crate::CheckinError::Conflict`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    CheckIn, Event, NewCheckIn, NewEvent, NewParticipant, NewPrincipal, Participant, Principal,
    PrincipalPublic, Result,
};

/// Principal storage keyed by normalized email
///
/// Lookups only see active principals; soft-deleted rows are anonymized and
/// unreachable through their original email.
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Find an active principal by email
    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalPublic>>;

    /// Find an active principal by email including the password hash
    async fn find_by_email_with_password(&self, email: &str) -> Result<Option<Principal>>;

    /// Find an active principal by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<PrincipalPublic>>;

    /// Whether any principal row (active or anonymized) holds this email
    async fn exists_by_email(&self, email: &str) -> Result<bool>;

    /// Persist a new principal; `Conflict` if the email is taken
    async fn create(&self, principal: NewPrincipal) -> Result<PrincipalPublic>;

    /// Soft-delete and anonymize a principal; `NotFound` if no active principal matches
    async fn soft_delete(&self, id: Uuid, deleted_by: Uuid) -> Result<()>;
}

/// Event and participant storage
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, event: NewEvent) -> Result<Event>;

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>>;

    /// Persist a participant; `NotFound` if the event does not exist,
    /// `Conflict` if the QR code is already used within the event
    async fn create_participant(&self, participant: NewParticipant) -> Result<Participant>;

    async fn find_participant(&self, id: Uuid) -> Result<Option<Participant>>;

    /// Participant with this id, scoped to the event
    async fn find_participant_in_event(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<Participant>>;

    /// Participant holding this QR code, scoped to the event
    async fn find_participant_by_qr(
        &self,
        event_id: Uuid,
        qr_code: &str,
    ) -> Result<Option<Participant>>;

    async fn list_participants(&self, event_id: Uuid) -> Result<Vec<Participant>>;
}

/// Check-in storage
///
/// `insert` is the single arbitration point for concurrent check-ins: it must
/// fail with `Conflict` when an active check-in already exists for the same
/// (event, participant), atomically with respect to other inserts.
#[async_trait]
pub trait CheckInRepository: Send + Sync {
    async fn insert(&self, check_in: NewCheckIn) -> Result<CheckIn>;

    /// Check-in by id, active or cancelled
    async fn find(&self, id: Uuid) -> Result<Option<CheckIn>>;

    /// The participant's active check-in, if any
    async fn find_active_for_participant(&self, participant_id: Uuid) -> Result<Option<CheckIn>>;

    /// Mark an active check-in cancelled; `NotFound` if it is not active
    async fn cancel(&self, id: Uuid, cancelled_by: Uuid) -> Result<()>;
}
