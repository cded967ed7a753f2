//! Booking records: listing, cancellation and the event-deletion cascade.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::RetryPolicy;
use crate::identity::Caller;
use crate::models::Booking;
use crate::store::{BookingFilter, DocumentStore, EventFilter, StoreError, StoreTransaction};
use crate::utils::error::AppError;

#[derive(Clone)]
pub struct BookingRegister {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl BookingRegister {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn list_by_purchaser(&self, purchaser_id: &str) -> Result<Vec<Booking>, AppError> {
        Ok(self
            .store
            .list_bookings(&BookingFilter::purchaser(purchaser_id))
            .await?)
    }

    /// Bookings whose event still exists. Stragglers from a cascade that has
    /// not landed yet are hidden rather than shown as dead tickets.
    pub async fn list_live_for_purchaser(
        &self,
        purchaser_id: &str,
    ) -> Result<Vec<Booking>, AppError> {
        let bookings = self.list_by_purchaser(purchaser_id).await?;
        Ok(live_only(self.store.as_ref(), bookings).await?)
    }

    pub async fn list_by_event(&self, event_id: &str) -> Result<Vec<Booking>, AppError> {
        Ok(self
            .store
            .list_bookings(&BookingFilter::event(event_id))
            .await?)
    }

    pub async fn get(&self, booking_id: &str) -> Result<Booking, AppError> {
        let mut tx = self.store.begin().await?;
        tx.get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking '{booking_id}'")))
    }

    /// Deletes a booking and hands its tickets back to the event in the same
    /// commit. Only the purchaser or an admin may cancel.
    pub async fn cancel(&self, booking_id: &str, caller: &Caller) -> Result<Booking, AppError> {
        let booking = self
            .policy
            .run("cancel", move || self.try_cancel(booking_id, caller))
            .await?;
        tracing::info!(
            booking_id,
            event_id = %booking.event_id,
            ticket_count = booking.ticket_count,
            cancelled_by = %caller.id,
            "Booking cancelled"
        );
        Ok(booking)
    }

    async fn try_cancel(&self, booking_id: &str, caller: &Caller) -> Result<Booking, AppError> {
        let mut tx = self.store.begin().await?;
        let Some(booking) = tx.get_booking(booking_id).await? else {
            return Err(AppError::NotFound(format!("booking '{booking_id}'")));
        };
        if !caller.may_manage(&booking.purchaser_id) {
            return Err(AppError::Forbidden(
                "only the purchaser can cancel this booking".to_string(),
            ));
        }

        if let Some(mut event) = tx.get_event(&booking.event_id).await? {
            event.tickets_sold = event.tickets_sold.saturating_sub(booking.ticket_count);
            event.updated_at = Utc::now();
            tx.put_event(&event).await?;
        }
        tx.delete_booking(&booking.id).await?;
        tx.commit().await?;
        Ok(booking)
    }

    /// Admin reconciliation: removes every booking of an event, keeps the
    /// event and returns the tickets to it. Only the event's owner or an
    /// admin may do this. Returns how many bookings were removed.
    pub async fn delete_all_for_event(
        &self,
        event_id: &str,
        caller: &Caller,
    ) -> Result<u64, AppError> {
        let removed = self
            .policy
            .run("delete_all_for_event", move || {
                self.try_delete_all(event_id, caller)
            })
            .await?;
        tracing::info!(event_id, removed, cleared_by = %caller.id, "Deleted bookings for event");
        Ok(removed)
    }

    async fn try_delete_all(&self, event_id: &str, caller: &Caller) -> Result<u64, AppError> {
        let mut tx = self.store.begin().await?;
        // Lock the event before touching its bookings so no purchase can
        // commit between the delete and the counter update.
        let Some(mut event) = tx.get_event(event_id).await? else {
            return Err(AppError::NotFound(format!("event '{event_id}'")));
        };
        if !caller.may_manage(&event.organizer_id) {
            return Err(AppError::Forbidden(
                "only the organizer can clear this event's bookings".to_string(),
            ));
        }

        let removed = cascade(tx.as_mut(), event_id).await?;
        let returned = removed
            .iter()
            .fold(0u32, |sum, booking| sum.saturating_add(booking.ticket_count));
        event.tickets_sold = event.tickets_sold.saturating_sub(returned);
        event.updated_at = Utc::now();
        tx.put_event(&event).await?;
        tx.commit().await?;
        Ok(removed.len() as u64)
    }
}

/// Drops bookings whose event no longer exists.
pub(crate) async fn live_only(
    store: &dyn DocumentStore,
    bookings: Vec<Booking>,
) -> Result<Vec<Booking>, StoreError> {
    if bookings.is_empty() {
        return Ok(bookings);
    }
    let live: HashSet<String> = store
        .list_events(&EventFilter::default())
        .await?
        .into_iter()
        .map(|event| event.id)
        .collect();
    Ok(bookings
        .into_iter()
        .filter(|booking| live.contains(&booking.event_id))
        .collect())
}

/// Deletes an event's bookings inside the caller's transaction and returns
/// the removed rows.
pub(crate) async fn cascade(
    tx: &mut dyn StoreTransaction,
    event_id: &str,
) -> Result<Vec<Booking>, AppError> {
    Ok(tx.delete_bookings_for_event(event_id).await?)
}
