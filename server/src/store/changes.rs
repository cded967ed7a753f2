use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{BookingFilter, EventFilter};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Upserted,
    Deleted,
}

/// A committed write, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "lowercase")]
pub enum Change {
    Event {
        event_id: String,
        organizer_id: String,
        kind: ChangeKind,
    },
    Booking {
        booking_id: String,
        event_id: String,
        purchaser_id: String,
        kind: ChangeKind,
    },
}

impl Change {
    pub fn touches_events(&self, filter: &EventFilter) -> bool {
        match self {
            Change::Event { organizer_id, .. } => filter
                .organizer_id
                .as_deref()
                .map_or(true, |id| id == organizer_id),
            Change::Booking { .. } => false,
        }
    }

    pub fn touches_bookings(&self, filter: &BookingFilter) -> bool {
        match self {
            Change::Booking {
                event_id,
                purchaser_id,
                ..
            } => filter.matches_keys(purchaser_id, event_id),
            // Event deletions change which of a purchaser's bookings are live.
            Change::Event {
                event_id, kind, ..
            } => {
                *kind == ChangeKind::Deleted
                    && filter.event_id.as_deref().map_or(true, |id| id == event_id)
            }
        }
    }
}

/// Fan-out of committed changes to every subscriber in this process.
#[derive(Debug, Clone)]
pub struct ChangeHub {
    sender: broadcast::Sender<Change>,
}

impl ChangeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    pub fn publish(&self, change: Change) {
        // No subscribers is not an error.
        let _ = self.sender.send(change);
    }
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new()
    }
}
