//! Event and participant management

use crate::auth::AuthenticatedUser;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use checkin_core::{
    normalize_email, CheckinError, Event, EventRepository, NewEvent, NewParticipant, Participant,
    Result,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Random bytes behind each QR code value
const QR_CODE_BYTES: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateEventRequest {
    #[validate(length(min = 1, max = 200, message = "name must be 1-200 characters"))]
    pub name: String,
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddParticipantRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1-100 characters"))]
    pub name: String,
    #[validate(email(message = "invalid email format"))]
    pub email: Option<String>,
}

/// Event with its participants when the viewer manages the event
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventDetails {
    #[serde(flatten)]
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<Participant>>,
}

#[derive(Clone)]
pub struct EventService {
    events: Arc<dyn EventRepository>,
}

impl EventService {
    pub fn new(events: Arc<dyn EventRepository>) -> Self {
        Self { events }
    }

    pub async fn create_event(&self, organizer_id: Uuid, request: CreateEventRequest) -> Result<Event> {
        request
            .validate()
            .map_err(|e| CheckinError::Validation(e.to_string()))?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(CheckinError::Validation("name is required".to_string()));
        }

        let event = self
            .events
            .create_event(NewEvent {
                organizer_id,
                name: name.to_string(),
                starts_at: request.starts_at,
            })
            .await?;

        tracing::info!(event_id = %event.id, organizer_id = %organizer_id, "Event created");
        Ok(event)
    }

    /// Register a participant and assign a fresh QR code value
    pub async fn add_participant(
        &self,
        event_id: Uuid,
        actor_id: Uuid,
        is_admin: bool,
        request: AddParticipantRequest,
    ) -> Result<Participant> {
        request
            .validate()
            .map_err(|e| CheckinError::Validation(e.to_string()))?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(CheckinError::Validation("name is required".to_string()));
        }

        let event = self
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| CheckinError::NotFound("event".to_string()))?;

        if !event.is_managed_by(actor_id, is_admin) {
            return Err(CheckinError::Forbidden(
                "only the event organizer or an admin may add participants".to_string(),
            ));
        }

        self.events
            .create_participant(NewParticipant {
                event_id,
                name: name.to_string(),
                email: request.email.as_deref().map(normalize_email),
                qr_code: generate_qr_code(),
            })
            .await
    }

    /// Event details; participants are listed only for its organizer or an admin
    pub async fn get_event(
        &self,
        event_id: Uuid,
        viewer: Option<&AuthenticatedUser>,
    ) -> Result<EventDetails> {
        let event = self
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| CheckinError::NotFound("event".to_string()))?;

        let participants = match viewer {
            Some(user) if event.is_managed_by(user.user_id, user.is_admin()) => {
                Some(self.events.list_participants(event_id).await?)
            }
            _ => None,
        };

        Ok(EventDetails {
            event,
            participants,
        })
    }
}

fn generate_qr_code() -> String {
    let mut bytes = [0u8; QR_CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkin_core::InMemoryStore;

    fn viewer(user_id: Uuid, role: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id,
            role: role.to_string(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    async fn service_with_event() -> (EventService, Uuid, Event) {
        let service = EventService::new(Arc::new(InMemoryStore::new()));
        let organizer = Uuid::new_v4();
        let event = service
            .create_event(
                organizer,
                CreateEventRequest {
                    name: " RustConf ".to_string(),
                    starts_at: None,
                },
            )
            .await
            .unwrap();
        (service, organizer, event)
    }

    #[tokio::test]
    async fn test_create_event_trims_name() {
        let (_, organizer, event) = service_with_event().await;
        assert_eq!(event.name, "RustConf");
        assert_eq!(event.organizer_id, organizer);
    }

    #[tokio::test]
    async fn test_create_event_rejects_blank_name() {
        let service = EventService::new(Arc::new(InMemoryStore::new()));
        let result = service
            .create_event(
                Uuid::new_v4(),
                CreateEventRequest {
                    name: "   ".to_string(),
                    starts_at: None,
                },
            )
            .await;
        assert!(matches!(result, Err(CheckinError::Validation(_))));
    }

    #[tokio::test]
    async fn test_add_participant_generates_distinct_qr_codes() {
        let (service, organizer, event) = service_with_event().await;

        let mut codes = Vec::new();
        for name in ["P1", "P2", "P3"] {
            let participant = service
                .add_participant(
                    event.id,
                    organizer,
                    false,
                    AddParticipantRequest {
                        name: name.to_string(),
                        email: None,
                    },
                )
                .await
                .unwrap();
            assert_eq!(participant.qr_code.len(), 32);
            codes.push(participant.qr_code);
        }

        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 3);
    }

    #[tokio::test]
    async fn test_add_participant_authorization() {
        let (service, _, event) = service_with_event().await;
        let request = AddParticipantRequest {
            name: "P".to_string(),
            email: Some("P@X.com".to_string()),
        };

        let forbidden = service
            .add_participant(event.id, Uuid::new_v4(), false, request.clone())
            .await;
        assert!(matches!(forbidden, Err(CheckinError::Forbidden(_))));

        let admin = service
            .add_participant(event.id, Uuid::new_v4(), true, request)
            .await
            .unwrap();
        assert_eq!(admin.email.as_deref(), Some("p@x.com"));

        let missing = service
            .add_participant(
                Uuid::new_v4(),
                Uuid::new_v4(),
                true,
                AddParticipantRequest {
                    name: "P".to_string(),
                    email: None,
                },
            )
            .await;
        assert!(matches!(missing, Err(CheckinError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_event_lists_participants_for_managers_only() {
        let (service, organizer, event) = service_with_event().await;
        service
            .add_participant(
                event.id,
                organizer,
                false,
                AddParticipantRequest {
                    name: "P".to_string(),
                    email: None,
                },
            )
            .await
            .unwrap();

        let anonymous = service.get_event(event.id, None).await.unwrap();
        assert!(anonymous.participants.is_none());

        let stranger = viewer(Uuid::new_v4(), "organizer");
        let other = service.get_event(event.id, Some(&stranger)).await.unwrap();
        assert!(other.participants.is_none());

        let owner = viewer(organizer, "organizer");
        let managed = service.get_event(event.id, Some(&owner)).await.unwrap();
        assert_eq!(managed.participants.map(|p| p.len()), Some(1));

        let admin = viewer(Uuid::new_v4(), "admin");
        let admin_view = service.get_event(event.id, Some(&admin)).await.unwrap();
        assert!(admin_view.participants.is_some());
    }
}
