//! Organizer event management.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use super::register::cascade;
use super::RetryPolicy;
use crate::identity::Caller;
use crate::media::BlobStorage;
use crate::models::{Event, EventDetails, EventDraft, EventStatus};
use crate::store::{DocumentStore, EventFilter};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub event_id: String,
    pub bookings_removed: u64,
}

#[derive(Clone)]
pub struct EventCatalog {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn BlobStorage>,
    policy: RetryPolicy,
}

impl EventCatalog {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        media: Arc<dyn BlobStorage>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            media,
            policy,
        }
    }

    pub async fn create(&self, caller: &Caller, draft: EventDraft) -> Result<Event, AppError> {
        if !caller.can_organize() {
            return Err(AppError::Forbidden(
                "only organizers can create events".to_string(),
            ));
        }
        draft.details.validate_structure()?;
        if draft.publish {
            draft.details.validate_for_publish()?;
        }

        let event = Event::new(caller.id.as_str(), draft, Utc::now());
        let mut tx = self.store.begin().await?;
        tx.insert_event(&event).await?;
        tx.commit().await?;

        tracing::info!(
            event_id = %event.id,
            organizer_id = %event.organizer_id,
            status = %event.status,
            "Event created"
        );
        Ok(event)
    }

    /// Replaces the editable fields. The sold counter is whatever the store
    /// holds at commit time, never the value the organizer's form was loaded with.
    pub async fn update(
        &self,
        caller: &Caller,
        event_id: &str,
        details: EventDetails,
    ) -> Result<Event, AppError> {
        details.validate_structure()?;
        let details = &details;
        let event = self
            .policy
            .run("update_event", move || self.try_update(caller, event_id, details))
            .await?;
        tracing::info!(event_id, "Event updated");
        Ok(event)
    }

    async fn try_update(
        &self,
        caller: &Caller,
        event_id: &str,
        details: &EventDetails,
    ) -> Result<Event, AppError> {
        let mut tx = self.store.begin().await?;
        let mut event = tx
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))?;
        authorize_owner(caller, &event)?;

        if let Some(total) = details.tickets_total {
            if total < event.tickets_sold {
                return Err(AppError::ValidationError(format!(
                    "capacity {total} is below the {} tickets already sold",
                    event.tickets_sold
                )));
            }
        }
        if event.is_published() {
            details.validate_for_publish()?;
        }

        event.apply_details(details.clone(), Utc::now());
        tx.put_event(&event).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Moves a draft to published once it passes the completeness gate.
    /// Publishing a published event is a no-op.
    pub async fn publish(&self, caller: &Caller, event_id: &str) -> Result<Event, AppError> {
        let event = self
            .policy
            .run("publish_event", move || self.try_publish(caller, event_id))
            .await?;
        tracing::info!(event_id, "Event published");
        Ok(event)
    }

    async fn try_publish(&self, caller: &Caller, event_id: &str) -> Result<Event, AppError> {
        let mut tx = self.store.begin().await?;
        let mut event = tx
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))?;
        authorize_owner(caller, &event)?;
        if event.is_published() {
            return Ok(event);
        }

        event.details().validate_for_publish()?;
        event.status = EventStatus::Published;
        event.updated_at = Utc::now();
        tx.put_event(&event).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Deletes the event together with all of its bookings in one commit, then
    /// drops the cover image if it lives in our blob storage.
    pub async fn delete(&self, caller: &Caller, event_id: &str) -> Result<DeletionReport, AppError> {
        let (event, bookings_removed) = self
            .policy
            .run("delete_event", move || self.try_delete(caller, event_id))
            .await?;

        tracing::info!(event_id, bookings_removed, "Event deleted");

        if let Some(uri) = event.cover_image_uri.as_deref() {
            if self.media.owns(uri) {
                if let Err(e) = self.media.delete(uri).await {
                    tracing::warn!(event_id, cover_image_uri = uri, error = %e, "Failed to delete cover image");
                }
            }
        }

        Ok(DeletionReport {
            event_id: event.id,
            bookings_removed,
        })
    }

    async fn try_delete(&self, caller: &Caller, event_id: &str) -> Result<(Event, u64), AppError> {
        let mut tx = self.store.begin().await?;
        let event = tx
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))?;
        authorize_owner(caller, &event)?;

        let removed = cascade(tx.as_mut(), event_id).await?.len() as u64;
        tx.delete_event(event_id).await?;
        tx.commit().await?;
        Ok((event, removed))
    }

    /// Published events are public; drafts only to their owner or an admin.
    pub async fn get(&self, caller: Option<&Caller>, event_id: &str) -> Result<Event, AppError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))?;
        let visible = event.is_published()
            || caller.is_some_and(|caller| caller.may_manage(&event.organizer_id));
        if !visible {
            return Err(AppError::NotFound(format!("event '{event_id}'")));
        }
        Ok(event)
    }

    pub async fn list_published(&self) -> Result<Vec<Event>, AppError> {
        Ok(self.store.list_events(&EventFilter::published()).await?)
    }

    pub async fn list_for_organizer(&self, organizer_id: &str) -> Result<Vec<Event>, AppError> {
        Ok(self
            .store
            .list_events(&EventFilter::organizer(organizer_id))
            .await?)
    }

    pub async fn list_all(&self, caller: &Caller) -> Result<Vec<Event>, AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("admin only".to_string()));
        }
        Ok(self.store.list_events(&EventFilter::default()).await?)
    }

    /// Loads an event the caller may manage.
    pub async fn get_managed(&self, caller: &Caller, event_id: &str) -> Result<Event, AppError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))?;
        authorize_owner(caller, &event)?;
        Ok(event)
    }
}

fn authorize_owner(caller: &Caller, event: &Event) -> Result<(), AppError> {
    if caller.may_manage(&event.organizer_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "only the event's organizer can do that".to_string(),
        ))
    }
}
