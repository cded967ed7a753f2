//! Document store boundary.
//!
//! Everything that must be atomic across the event document and its bookings
//! goes through a [`StoreTransaction`]. Capacity is enforced by re-reading the
//! event inside the transaction, so correctness depends on the backend's
//! commit primitive and not on any lock held by the services.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{Booking, Event, EventStatus};

pub mod changes;
pub mod memory;
pub mod postgres;

pub use changes::{Change, ChangeHub, ChangeKind};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction committed a conflicting write first. Retryable.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// A stored document could not be decoded.
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub organizer_id: Option<String>,
}

impl EventFilter {
    pub fn published() -> Self {
        Self {
            status: Some(EventStatus::Published),
            organizer_id: None,
        }
    }

    pub fn organizer(organizer_id: impl Into<String>) -> Self {
        Self {
            status: None,
            organizer_id: Some(organizer_id.into()),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.status.map_or(true, |status| event.status == status)
            && self
                .organizer_id
                .as_deref()
                .map_or(true, |id| event.organizer_id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub purchaser_id: Option<String>,
    pub event_id: Option<String>,
}

impl BookingFilter {
    pub fn purchaser(purchaser_id: impl Into<String>) -> Self {
        Self {
            purchaser_id: Some(purchaser_id.into()),
            event_id: None,
        }
    }

    pub fn event(event_id: impl Into<String>) -> Self {
        Self {
            purchaser_id: None,
            event_id: Some(event_id.into()),
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.matches_keys(&booking.purchaser_id, &booking.event_id)
    }

    pub fn matches_keys(&self, purchaser_id: &str, event_id: &str) -> bool {
        self.purchaser_id
            .as_deref()
            .map_or(true, |id| id == purchaser_id)
            && self.event_id.as_deref().map_or(true, |id| id == event_id)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Events matching `filter`, newest first.
    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError>;

    /// Bookings matching `filter`, newest first.
    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError>;

    /// Notifications for every committed write.
    fn changes(&self) -> broadcast::Receiver<Change>;
}

/// A unit of all-or-nothing work. Dropping it without calling
/// [`StoreTransaction::commit`] discards every write.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Reads the event and makes it part of the transaction's read set, so a
    /// concurrent write to it fails this transaction (or waits for it).
    async fn get_event(&mut self, event_id: &str) -> Result<Option<Event>, StoreError>;

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError>;

    async fn put_event(&mut self, event: &Event) -> Result<(), StoreError>;

    async fn delete_event(&mut self, event_id: &str) -> Result<(), StoreError>;

    async fn get_booking(&mut self, booking_id: &str) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_event(&mut self, event_id: &str) -> Result<Vec<Booking>, StoreError>;

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    async fn delete_booking(&mut self, booking_id: &str) -> Result<(), StoreError>;

    /// Returns the bookings that were actually removed.
    async fn delete_bookings_for_event(&mut self, event_id: &str)
        -> Result<Vec<Booking>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
