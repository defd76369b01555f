//! Check-in coordinator
//!
//! Records at most one active check-in per participant per event. The
//! storage adapter's uniqueness constraint is the only arbiter between
//! concurrent check-ins: the coordinator never looks for an existing row
//! before inserting, it maps the adapter's `Conflict` straight through.

use crate::audit::{audit_log, AuditEvent};
use checkin_core::{
    CheckIn, CheckInMethod, CheckInRepository, CheckinError, EventRepository, NewCheckIn,
    Participant, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

/// Maximum stored length of client-supplied device metadata
pub const MAX_DEVICE_INFO_LEN: usize = 255;

/// Check-in request body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckInRequest {
    pub method: CheckInMethod,
    /// QR code value for `qrcode`, participant id for `manual`
    pub participant_ref: String,
    pub device_info: Option<String>,
}

/// Whether a participant is currently checked in
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckInStatus {
    pub participant_id: Uuid,
    pub checked_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_in: Option<CheckIn>,
}

#[derive(Clone)]
pub struct CheckInCoordinator {
    events: Arc<dyn EventRepository>,
    check_ins: Arc<dyn CheckInRepository>,
}

impl CheckInCoordinator {
    pub fn new(events: Arc<dyn EventRepository>, check_ins: Arc<dyn CheckInRepository>) -> Self {
        Self { events, check_ins }
    }

    /// Check a participant in to an event
    ///
    /// `participant_ref` is resolved within the event: a QR code value for
    /// [`CheckInMethod::QrCode`], a participant id for [`CheckInMethod::Manual`].
    ///
    /// # Errors
    ///
    /// * `Validation` - Empty reference, or a manual reference that is not an id
    /// * `NotFound` - Unknown event, or no participant matches within the event
    /// * `Forbidden` - Actor is neither the event's organizer nor an admin
    /// * `Conflict` - Participant already has an active check-in for the event
    pub async fn check_in(
        &self,
        event_id: Uuid,
        actor_id: Uuid,
        is_admin: bool,
        method: CheckInMethod,
        participant_ref: &str,
        device_info: Option<String>,
    ) -> Result<CheckIn> {
        let participant_ref = participant_ref.trim();
        if participant_ref.is_empty() {
            return Err(CheckinError::Validation(
                "participant_ref is required".to_string(),
            ));
        }

        let event = self
            .events
            .find_event(event_id)
            .await?
            .ok_or_else(|| CheckinError::NotFound("event".to_string()))?;

        if !event.is_managed_by(actor_id, is_admin) {
            return Err(CheckinError::Forbidden(
                "only the event organizer or an admin may check participants in".to_string(),
            ));
        }

        let participant = self
            .resolve_participant(event_id, method, participant_ref)
            .await?
            .ok_or_else(|| CheckinError::NotFound("participant".to_string()))?;

        let checked_in_by = match method {
            CheckInMethod::QrCode => None,
            CheckInMethod::Manual => Some(actor_id),
        };

        let result = self
            .check_ins
            .insert(NewCheckIn {
                event_id,
                participant_id: participant.id,
                method,
                checked_in_by,
                device_info: device_info.map(truncate_device_info),
            })
            .await;

        match &result {
            Ok(check_in) => audit_log(&AuditEvent::CheckIn {
                check_in_id: check_in.id,
                event_id,
                participant_id: participant.id,
                method: method.to_string(),
                actor_id,
            }),
            Err(CheckinError::Conflict(_)) => audit_log(&AuditEvent::DuplicateCheckIn {
                event_id,
                participant_id: participant.id,
                actor_id,
            }),
            Err(_) => {}
        }

        result
    }

    async fn resolve_participant(
        &self,
        event_id: Uuid,
        method: CheckInMethod,
        participant_ref: &str,
    ) -> Result<Option<Participant>> {
        match method {
            CheckInMethod::QrCode => {
                self.events
                    .find_participant_by_qr(event_id, participant_ref)
                    .await
            }
            CheckInMethod::Manual => {
                let participant_id = Uuid::parse_str(participant_ref).map_err(|_| {
                    CheckinError::Validation(
                        "participant_ref must be a participant id for manual check-in".to_string(),
                    )
                })?;
                self.events
                    .find_participant_in_event(event_id, participant_id)
                    .await
            }
        }
    }

    /// Cancel an active check-in so the participant can be checked in again
    ///
    /// # Errors
    ///
    /// * `NotFound` - No check-in with this id, or it is already cancelled
    /// * `Forbidden` - Actor is neither the event's organizer nor an admin
    pub async fn cancel(&self, check_in_id: Uuid, actor_id: Uuid, is_admin: bool) -> Result<()> {
        let check_in = self
            .check_ins
            .find(check_in_id)
            .await?
            .filter(CheckIn::is_active)
            .ok_or_else(|| CheckinError::NotFound("check-in".to_string()))?;

        let event = self
            .events
            .find_event(check_in.event_id)
            .await?
            .ok_or_else(|| CheckinError::NotFound("event".to_string()))?;

        if !event.is_managed_by(actor_id, is_admin) {
            return Err(CheckinError::Forbidden(
                "only the event organizer or an admin may cancel check-ins".to_string(),
            ));
        }

        // A concurrent cancel can still win here; the adapter reports NotFound
        self.check_ins.cancel(check_in_id, actor_id).await?;

        audit_log(&AuditEvent::CheckInCancelled {
            check_in_id,
            actor_id,
        });

        Ok(())
    }

    /// Current check-in state of a participant
    pub async fn get_status(&self, participant_id: Uuid) -> Result<CheckInStatus> {
        if self.events.find_participant(participant_id).await?.is_none() {
            return Err(CheckinError::NotFound("participant".to_string()));
        }

        let check_in = self
            .check_ins
            .find_active_for_participant(participant_id)
            .await?;

        Ok(CheckInStatus {
            participant_id,
            checked_in: check_in.is_some(),
            check_in,
        })
    }
}

fn truncate_device_info(info: String) -> String {
    match info.char_indices().nth(MAX_DEVICE_INFO_LEN) {
        Some((idx, _)) => info[..idx].to_string(),
        None => info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkin_core::{InMemoryStore, NewEvent, NewParticipant};

    struct Fixture {
        coordinator: CheckInCoordinator,
        organizer: Uuid,
        event_id: Uuid,
        participant: Participant,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let organizer = Uuid::new_v4();
        let event = store
            .create_event(NewEvent {
                organizer_id: organizer,
                name: "RustConf".to_string(),
                starts_at: None,
            })
            .await
            .unwrap();
        let participant = store
            .create_participant(NewParticipant {
                event_id: event.id,
                name: "P".to_string(),
                email: None,
                qr_code: "qr-p".to_string(),
            })
            .await
            .unwrap();

        Fixture {
            coordinator: CheckInCoordinator::new(store.clone(), store),
            organizer,
            event_id: event.id,
            participant,
        }
    }

    #[tokio::test]
    async fn test_qr_check_in_then_duplicate_conflicts() {
        let f = fixture().await;

        let check_in = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await
            .unwrap();
        assert_eq!(check_in.participant_id, f.participant.id);
        assert_eq!(check_in.checked_in_by, None);

        let duplicate = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await;
        assert!(matches!(duplicate, Err(CheckinError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_manual_check_in_records_actor() {
        let f = fixture().await;
        let participant_ref = f.participant.id.to_string();

        let check_in = f
            .coordinator
            .check_in(
                f.event_id,
                f.organizer,
                false,
                CheckInMethod::Manual,
                &participant_ref,
                Some("gate-2".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(check_in.method, CheckInMethod::Manual);
        assert_eq!(check_in.checked_in_by, Some(f.organizer));
        assert_eq!(check_in.device_info.as_deref(), Some("gate-2"));
    }

    #[tokio::test]
    async fn test_check_in_authorization() {
        let f = fixture().await;
        let stranger = Uuid::new_v4();

        let forbidden = f
            .coordinator
            .check_in(f.event_id, stranger, false, CheckInMethod::QrCode, "qr-p", None)
            .await;
        assert!(matches!(forbidden, Err(CheckinError::Forbidden(_))));

        let admin = f
            .coordinator
            .check_in(f.event_id, stranger, true, CheckInMethod::QrCode, "qr-p", None)
            .await;
        assert!(admin.is_ok());
    }

    #[tokio::test]
    async fn test_check_in_resolution_failures() {
        let f = fixture().await;

        let unknown_event = f
            .coordinator
            .check_in(Uuid::new_v4(), f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await;
        assert!(matches!(unknown_event, Err(CheckinError::NotFound(_))));

        let unknown_qr = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "nope", None)
            .await;
        assert!(matches!(unknown_qr, Err(CheckinError::NotFound(_))));

        let not_an_id = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::Manual, "qr-p", None)
            .await;
        assert!(matches!(not_an_id, Err(CheckinError::Validation(_))));

        let empty = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "  ", None)
            .await;
        assert!(matches!(empty, Err(CheckinError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_check_ins_have_single_winner() {
        let f = fixture().await;

        let attempts = (0..10).map(|_| {
            let coordinator = f.coordinator.clone();
            let (event_id, organizer) = (f.event_id, f.organizer);
            tokio::spawn(async move {
                coordinator
                    .check_in(event_id, organizer, false, CheckInMethod::QrCode, "qr-p", None)
                    .await
            })
        });
        let results = futures::future::join_all(attempts).await;

        let successes = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(CheckinError::Conflict(_)))))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 9);
    }

    #[tokio::test]
    async fn test_cancel_allows_fresh_check_in() {
        let f = fixture().await;

        let first = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await
            .unwrap();

        let stranger = f.coordinator.cancel(first.id, Uuid::new_v4(), false).await;
        assert!(matches!(stranger, Err(CheckinError::Forbidden(_))));

        f.coordinator
            .cancel(first.id, f.organizer, false)
            .await
            .unwrap();

        let again = f.coordinator.cancel(first.id, f.organizer, false).await;
        assert!(matches!(again, Err(CheckinError::NotFound(_))));

        let second = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await
            .unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn test_get_status() {
        let f = fixture().await;

        let before = f.coordinator.get_status(f.participant.id).await.unwrap();
        assert!(!before.checked_in);
        assert!(before.check_in.is_none());

        let check_in = f
            .coordinator
            .check_in(f.event_id, f.organizer, false, CheckInMethod::QrCode, "qr-p", None)
            .await
            .unwrap();

        let after = f.coordinator.get_status(f.participant.id).await.unwrap();
        assert!(after.checked_in);
        assert_eq!(after.check_in.map(|c| c.id), Some(check_in.id));

        assert!(matches!(
            f.coordinator.get_status(Uuid::new_v4()).await,
            Err(CheckinError::NotFound(_))
        ));
    }

    #[test]
    fn test_truncate_device_info() {
        let long = "x".repeat(MAX_DEVICE_INFO_LEN + 10);
        assert_eq!(truncate_device_info(long).len(), MAX_DEVICE_INFO_LEN);
        assert_eq!(truncate_device_info("ios".to_string()), "ios");
    }
}
