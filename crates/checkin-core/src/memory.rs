//! In-memory store
//!
//! Process-local adapter used when no database is configured and in tests.
//! All maps live behind a single lock so the uniqueness checks and the write
//! they guard happen atomically.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{CheckInRepository, EventRepository, PrincipalRepository};
use crate::{
    anonymized_identity, is_reserved_email, normalize_email, CheckIn, CheckinError, Event,
    NewCheckIn, NewEvent, NewParticipant, NewPrincipal, Participant, Principal, PrincipalPublic,
    Result,
};

#[derive(Default)]
struct State {
    principals: HashMap<Uuid, Principal>,
    events: HashMap<Uuid, Event>,
    participants: HashMap<Uuid, Participant>,
    check_ins: HashMap<Uuid, CheckIn>,
}

impl State {
    fn principal_by_email(&self, email: &str) -> Option<&Principal> {
        self.principals
            .values()
            .find(|p| !p.is_deleted() && p.email == email)
    }
}

/// In-memory store implementing every repository trait
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<PrincipalPublic>> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state.principal_by_email(&email).map(|p| p.to_public()))
    }

    async fn find_by_email_with_password(&self, email: &str) -> Result<Option<Principal>> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state.principal_by_email(&email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PrincipalPublic>> {
        let state = self.state.read().await;
        Ok(state
            .principals
            .get(&id)
            .filter(|p| !p.is_deleted())
            .map(|p| p.to_public()))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state.principals.values().any(|p| p.email == email))
    }

    async fn create(&self, principal: NewPrincipal) -> Result<PrincipalPublic> {
        let email = normalize_email(&principal.email);
        if is_reserved_email(&email) {
            return Err(CheckinError::Validation("email domain is reserved".to_string()));
        }
        let mut state = self.state.write().await;

        if state.principals.values().any(|p| p.email == email) {
            return Err(CheckinError::Conflict("email already registered".to_string()));
        }

        let now = Utc::now();
        let record = Principal {
            id: Uuid::new_v4(),
            email,
            password_hash: principal.password_hash,
            name: principal.name,
            role: principal.role,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            is_anonymized: false,
        };
        let public = record.to_public();
        state.principals.insert(record.id, record);

        Ok(public)
    }

    async fn soft_delete(&self, id: Uuid, deleted_by: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let principal = state
            .principals
            .get_mut(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| CheckinError::NotFound("principal".to_string()))?;

        let (email, name) = anonymized_identity(id);
        let now = Utc::now();
        principal.email = email;
        principal.name = name;
        principal.deleted_at = Some(now);
        principal.deleted_by = Some(deleted_by);
        principal.is_anonymized = true;
        principal.updated_at = now;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for InMemoryStore {
    async fn create_event(&self, event: NewEvent) -> Result<Event> {
        let record = Event {
            id: Uuid::new_v4(),
            organizer_id: event.organizer_id,
            name: event.name,
            starts_at: event.starts_at,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        state.events.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>> {
        let state = self.state.read().await;
        Ok(state.events.get(&id).cloned())
    }

    async fn create_participant(&self, participant: NewParticipant) -> Result<Participant> {
        let mut state = self.state.write().await;

        if !state.events.contains_key(&participant.event_id) {
            return Err(CheckinError::NotFound("event".to_string()));
        }
        if state
            .participants
            .values()
            .any(|p| p.event_id == participant.event_id && p.qr_code == participant.qr_code)
        {
            return Err(CheckinError::Conflict("QR code already in use".to_string()));
        }

        let record = Participant {
            id: Uuid::new_v4(),
            event_id: participant.event_id,
            name: participant.name,
            email: participant.email,
            qr_code: participant.qr_code,
            created_at: Utc::now(),
        };
        state.participants.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_participant(&self, id: Uuid) -> Result<Option<Participant>> {
        let state = self.state.read().await;
        Ok(state.participants.get(&id).cloned())
    }

    async fn find_participant_in_event(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<Participant>> {
        let state = self.state.read().await;
        Ok(state
            .participants
            .get(&participant_id)
            .filter(|p| p.event_id == event_id)
            .cloned())
    }

    async fn find_participant_by_qr(
        &self,
        event_id: Uuid,
        qr_code: &str,
    ) -> Result<Option<Participant>> {
        let state = self.state.read().await;
        Ok(state
            .participants
            .values()
            .find(|p| p.event_id == event_id && p.qr_code == qr_code)
            .cloned())
    }

    async fn list_participants(&self, event_id: Uuid) -> Result<Vec<Participant>> {
        let state = self.state.read().await;
        let mut participants: Vec<Participant> = state
            .participants
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.created_at);
        Ok(participants)
    }
}

#[async_trait]
impl CheckInRepository for InMemoryStore {
    async fn insert(&self, check_in: NewCheckIn) -> Result<CheckIn> {
        let mut state = self.state.write().await;

        if state.check_ins.values().any(|c| {
            c.is_active()
                && c.event_id == check_in.event_id
                && c.participant_id == check_in.participant_id
        }) {
            return Err(CheckinError::Conflict(
                "participant is already checked in for this event".to_string(),
            ));
        }

        let record = CheckIn {
            id: Uuid::new_v4(),
            event_id: check_in.event_id,
            participant_id: check_in.participant_id,
            method: check_in.method,
            checked_in_by: check_in.checked_in_by,
            device_info: check_in.device_info,
            checked_in_at: Utc::now(),
            cancelled_at: None,
            cancelled_by: None,
        };
        state.check_ins.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find(&self, id: Uuid) -> Result<Option<CheckIn>> {
        let state = self.state.read().await;
        Ok(state.check_ins.get(&id).cloned())
    }

    async fn find_active_for_participant(&self, participant_id: Uuid) -> Result<Option<CheckIn>> {
        let state = self.state.read().await;
        Ok(state
            .check_ins
            .values()
            .find(|c| c.is_active() && c.participant_id == participant_id)
            .cloned())
    }

    async fn cancel(&self, id: Uuid, cancelled_by: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let check_in = state
            .check_ins
            .get_mut(&id)
            .filter(|c| c.is_active())
            .ok_or_else(|| CheckinError::NotFound("check-in".to_string()))?;

        check_in.cancelled_at = Some(Utc::now());
        check_in.cancelled_by = Some(cancelled_by);
        Ok(())
    }
}
