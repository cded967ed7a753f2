//! Inventory ledger: the capacity invariant.
//!
//! The cached `tickets_sold` counter on the event is authoritative and is the
//! only number that gates a purchase. The sum over live bookings is exposed
//! for audit through [`InventoryLedger::audit`] but never used to decide.

use serde::Serialize;
use std::sync::Arc;

use crate::models::Event;
use crate::store::{BookingFilter, DocumentStore};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "tickets", rename_all = "lowercase")]
pub enum Remaining {
    Unlimited,
    Finite(u32),
}

impl Remaining {
    pub fn of(event: &Event) -> Self {
        match event.tickets_total {
            None => Remaining::Unlimited,
            Some(total) => Remaining::Finite(total.saturating_sub(event.tickets_sold)),
        }
    }

    pub fn admits(&self, quantity: u32) -> bool {
        match self {
            Remaining::Unlimited => true,
            Remaining::Finite(left) => quantity <= *left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidQuantity,
    EventNotFound,
    NotPublished,
    SoldOut { remaining: u32 },
}

impl Rejection {
    pub fn into_error(self, event_id: &str, requested: u32) -> AppError {
        match self {
            Rejection::InvalidQuantity => {
                AppError::ValidationError("quantity must be at least 1".to_string())
            }
            Rejection::EventNotFound => AppError::NotFound(format!("event '{event_id}'")),
            Rejection::NotPublished => {
                AppError::ValidationError(format!("event '{event_id}' is not on sale"))
            }
            Rejection::SoldOut { remaining } => AppError::SoldOut {
                event_id: event_id.to_string(),
                requested,
                remaining,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Rejected(Rejection),
}

/// Pure precondition check against one view of the event. Callers that go on
/// to write must run it on the copy read inside their transaction.
pub fn check(event: &Event, requested: u32) -> Authorization {
    if requested == 0 {
        return Authorization::Rejected(Rejection::InvalidQuantity);
    }
    if !event.is_published() {
        return Authorization::Rejected(Rejection::NotPublished);
    }
    match Remaining::of(event) {
        remaining if remaining.admits(requested) => Authorization::Authorized,
        Remaining::Finite(left) => Authorization::Rejected(Rejection::SoldOut { remaining: left }),
        Remaining::Unlimited => Authorization::Authorized,
    }
}

/// Cached counter next to the live booking sum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub event_id: String,
    pub tickets_total: Option<u32>,
    pub tickets_sold: u32,
    pub live_sold: u32,
    pub consistent: bool,
}

#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn DocumentStore>,
}

impl InventoryLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn remaining(&self, event_id: &str) -> Result<Remaining, AppError> {
        let event = self.load(event_id).await?;
        Ok(Remaining::of(&event))
    }

    /// Advisory: the answer can be stale by the time a purchase commits.
    pub async fn authorize(&self, event_id: &str, requested: u32) -> Result<Authorization, AppError> {
        if requested == 0 {
            return Ok(Authorization::Rejected(Rejection::InvalidQuantity));
        }
        Ok(match self.store.get_event(event_id).await? {
            None => Authorization::Rejected(Rejection::EventNotFound),
            Some(event) => check(&event, requested),
        })
    }

    /// Tickets sold according to the booking records.
    pub async fn live_sold(&self, event_id: &str) -> Result<u32, AppError> {
        let bookings = self
            .store
            .list_bookings(&BookingFilter::event(event_id))
            .await?;
        Ok(bookings.iter().map(|booking| booking.ticket_count).sum())
    }

    pub async fn audit(&self, event_id: &str) -> Result<LedgerAudit, AppError> {
        let event = self.load(event_id).await?;
        let live_sold = self.live_sold(event_id).await?;
        let consistent = live_sold == event.tickets_sold;
        if !consistent {
            tracing::warn!(
                %event_id,
                tickets_sold = event.tickets_sold,
                live_sold,
                "Ledger counter disagrees with bookings"
            );
        }
        Ok(LedgerAudit {
            event_id: event.id,
            tickets_total: event.tickets_total,
            tickets_sold: event.tickets_sold,
            live_sold,
            consistent,
        })
    }

    async fn load(&self, event_id: &str) -> Result<Event, AppError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("event '{event_id}'")))
    }
}
