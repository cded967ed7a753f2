//! Atomic ticket purchase.
//!
//! A purchase re-reads the event inside a store transaction, checks capacity
//! against that copy, then writes the incremented counter and the new booking
//! in the same commit. Two buyers racing for the last tickets cannot both see
//! them: the loser's commit conflicts (memory store) or waits on the row lock
//! (PostgreSQL) and re-checks against the winner's counter.

use chrono::Utc;
use std::sync::Arc;
use tracing::Instrument;

use super::ledger::{self, Authorization};
use super::RetryPolicy;
use crate::identity::IdentityProvider;
use crate::models::event::MAX_TICKETS;
use crate::models::Booking;
use crate::store::DocumentStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone)]
struct PurchaseRequest {
    event_id: String,
    purchaser_id: String,
    quantity: u32,
}

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
}

impl BookingService {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Buys `quantity` tickets for `purchaser_id`.
    ///
    /// The transaction runs on its own task: once submitted it finishes even
    /// if the caller stops waiting, and only the result is lost.
    pub async fn purchase(
        &self,
        event_id: &str,
        purchaser_id: &str,
        quantity: u32,
    ) -> Result<Booking, AppError> {
        let request = validate(event_id, purchaser_id, quantity)?;
        let span = tracing::info_span!(
            "purchase",
            event_id = %request.event_id,
            purchaser_id = %request.purchaser_id,
            quantity = request.quantity,
        );

        let service = self.clone();
        let task = tokio::spawn(
            async move { service.purchase_with_retry(request).await }.instrument(span),
        );

        task.await
            .map_err(|e| AppError::InternalServerError(format!("purchase task failed: {e}")))?
    }

    /// Buys on behalf of whoever `identity` says is calling.
    pub async fn purchase_as(
        &self,
        identity: &dyn IdentityProvider,
        event_id: &str,
        quantity: u32,
    ) -> Result<Booking, AppError> {
        let purchaser_id = identity.current_caller_id().ok_or_else(|| {
            AppError::ValidationError("sign in to book tickets".to_string())
        })?;
        self.purchase(event_id, &purchaser_id, quantity).await
    }

    async fn purchase_with_retry(&self, request: PurchaseRequest) -> Result<Booking, AppError> {
        let request = &request;
        let booking = self
            .policy
            .run("purchase", move || self.try_purchase(request))
            .await?;

        tracing::info!(
            booking_id = %booking.id,
            total_amount = %booking.total_amount,
            "Purchase committed"
        );
        Ok(booking)
    }

    async fn try_purchase(&self, request: &PurchaseRequest) -> Result<Booking, AppError> {
        let mut tx = self.store.begin().await?;

        let Some(mut event) = tx.get_event(&request.event_id).await? else {
            return Err(AppError::NotFound(format!("event '{}'", request.event_id)));
        };
        if let Authorization::Rejected(rejection) = ledger::check(&event, request.quantity) {
            return Err(rejection.into_error(&event.id, request.quantity));
        }

        let sold = event
            .tickets_sold
            .checked_add(request.quantity)
            .filter(|sold| *sold <= MAX_TICKETS)
            .ok_or_else(|| {
                AppError::ValidationError(format!(
                    "cannot sell {} more tickets for this event",
                    request.quantity
                ))
            })?;

        let now = Utc::now();
        let booking =
            Booking::for_event(&event, request.purchaser_id.as_str(), request.quantity, now)?;
        event.tickets_sold = sold;
        event.updated_at = now;

        tx.put_event(&event).await?;
        tx.insert_booking(&booking).await?;
        tx.commit().await?;
        Ok(booking)
    }
}

fn validate(event_id: &str, purchaser_id: &str, quantity: u32) -> Result<PurchaseRequest, AppError> {
    if quantity == 0 {
        return Err(AppError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    let purchaser_id = purchaser_id.trim();
    if purchaser_id.is_empty() {
        return Err(AppError::ValidationError(
            "sign in to book tickets".to_string(),
        ));
    }
    let event_id = event_id.trim();
    if event_id.is_empty() {
        return Err(AppError::ValidationError("event id is required".to_string()));
    }
    Ok(PurchaseRequest {
        event_id: event_id.to_string(),
        purchaser_id: purchaser_id.to_string(),
        quantity,
    })
}
