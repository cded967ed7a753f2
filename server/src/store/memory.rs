//! In-process document store with optimistic transactions.
//!
//! Every event document carries a version. A transaction remembers the
//! version of each event it read; commit fails with [`StoreError::Conflict`]
//! if any of them moved in the meantime, and otherwise applies all buffered
//! writes at once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::{
    BookingFilter, Change, ChangeHub, ChangeKind, DocumentStore, EventFilter, StoreError,
    StoreTransaction,
};
use crate::models::{Booking, Event};

#[derive(Debug, Clone)]
struct Versioned {
    version: u64,
    event: Event,
}

#[derive(Debug, Default)]
struct Documents {
    events: HashMap<String, Versioned>,
    bookings: HashMap<String, Booking>,
    clock: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    docs: Arc<Mutex<Documents>>,
    hub: ChangeHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Documents>, StoreError> {
        lock_documents(&self.docs)
    }
}

fn lock_documents(docs: &Mutex<Documents>) -> Result<MutexGuard<'_, Documents>, StoreError> {
    docs.lock()
        .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            docs: Arc::clone(&self.docs),
            hub: self.hub.clone(),
            event_reads: HashMap::new(),
            booking_reads: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.lock()?.events.get(event_id).map(|v| v.event.clone()))
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let docs = self.lock()?;
        let mut events: Vec<Event> = docs
            .events
            .values()
            .map(|v| &v.event)
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let docs = self.lock()?;
        let mut bookings: Vec<Booking> = docs
            .bookings
            .values()
            .filter(|booking| filter.matches(booking))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(bookings)
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.hub.subscribe()
    }
}

#[derive(Debug)]
enum Write {
    PutEvent(Event),
    DeleteEvent(String),
    InsertBooking(Booking),
    DeleteBooking(String),
    DeleteBookingsForEvent(String),
}

pub struct MemoryTransaction {
    docs: Arc<Mutex<Documents>>,
    hub: ChangeHub,
    /// Version observed for each event read; `None` when it was absent.
    event_reads: HashMap<String, Option<u64>>,
    /// Presence observed for each booking read.
    booking_reads: HashMap<String, bool>,
    writes: Vec<Write>,
}

impl MemoryTransaction {
    fn record_event_read(&mut self, docs: &Documents, event_id: &str) {
        let version = docs.events.get(event_id).map(|v| v.version);
        self.event_reads
            .entry(event_id.to_string())
            .or_insert(version);
    }

    fn pending_event(&self, event_id: &str) -> Option<Option<Event>> {
        self.writes.iter().rev().find_map(|write| match write {
            Write::PutEvent(event) if event.id == event_id => Some(Some(event.clone())),
            Write::DeleteEvent(id) if id == event_id => Some(None),
            _ => None,
        })
    }

    fn pending_booking(&self, booking_id: &str) -> Option<Option<Booking>> {
        self.writes.iter().rev().find_map(|write| match write {
            Write::InsertBooking(booking) if booking.id == booking_id => {
                Some(Some(booking.clone()))
            }
            Write::DeleteBooking(id) if id == booking_id => Some(None),
            _ => None,
        })
    }

    /// Committed bookings of an event with this transaction's writes laid over them.
    fn view_bookings_for_event(&self, docs: &Documents, event_id: &str) -> Vec<Booking> {
        let mut view: HashMap<String, Booking> = docs
            .bookings
            .values()
            .filter(|booking| booking.event_id == event_id)
            .map(|booking| (booking.id.clone(), booking.clone()))
            .collect();
        for write in &self.writes {
            match write {
                Write::InsertBooking(booking) if booking.event_id == event_id => {
                    view.insert(booking.id.clone(), booking.clone());
                }
                Write::DeleteBooking(id) => {
                    view.remove(id);
                }
                Write::DeleteBookingsForEvent(id) if id == event_id => view.clear(),
                _ => {}
            }
        }
        let mut bookings: Vec<Booking> = view.into_values().collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        bookings
    }

    fn validate(&self, docs: &Documents) -> Result<(), StoreError> {
        for (event_id, seen) in &self.event_reads {
            let current = docs.events.get(event_id).map(|v| v.version);
            if current != *seen {
                return Err(StoreError::Conflict(format!(
                    "event '{event_id}' changed since it was read"
                )));
            }
        }
        for (booking_id, seen) in &self.booking_reads {
            if docs.bookings.contains_key(booking_id) != *seen {
                return Err(StoreError::Conflict(format!(
                    "booking '{booking_id}' changed since it was read"
                )));
            }
        }
        Ok(())
    }
}

fn apply(docs: &mut Documents, writes: Vec<Write>) -> Vec<Change> {
    let mut changes = Vec::new();
    for write in writes {
        match write {
            Write::PutEvent(event) => {
                docs.clock += 1;
                changes.push(Change::Event {
                    event_id: event.id.clone(),
                    organizer_id: event.organizer_id.clone(),
                    kind: ChangeKind::Upserted,
                });
                let version = docs.clock;
                docs.events.insert(event.id.clone(), Versioned { version, event });
            }
            Write::DeleteEvent(event_id) => {
                if let Some(removed) = docs.events.remove(&event_id) {
                    changes.push(Change::Event {
                        event_id,
                        organizer_id: removed.event.organizer_id,
                        kind: ChangeKind::Deleted,
                    });
                }
            }
            Write::InsertBooking(booking) => {
                changes.push(booking_change(&booking, ChangeKind::Upserted));
                docs.bookings.insert(booking.id.clone(), booking);
            }
            Write::DeleteBooking(booking_id) => {
                if let Some(removed) = docs.bookings.remove(&booking_id) {
                    changes.push(booking_change(&removed, ChangeKind::Deleted));
                }
            }
            Write::DeleteBookingsForEvent(event_id) => {
                let doomed: Vec<String> = docs
                    .bookings
                    .values()
                    .filter(|booking| booking.event_id == event_id)
                    .map(|booking| booking.id.clone())
                    .collect();
                for booking_id in doomed {
                    if let Some(removed) = docs.bookings.remove(&booking_id) {
                        changes.push(booking_change(&removed, ChangeKind::Deleted));
                    }
                }
            }
        }
    }
    changes
}

fn booking_change(booking: &Booking, kind: ChangeKind) -> Change {
    Change::Booking {
        booking_id: booking.id.clone(),
        event_id: booking.event_id.clone(),
        purchaser_id: booking.purchaser_id.clone(),
        kind,
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get_event(&mut self, event_id: &str) -> Result<Option<Event>, StoreError> {
        if let Some(pending) = self.pending_event(event_id) {
            return Ok(pending);
        }
        let docs = Arc::clone(&self.docs);
        let docs = lock_documents(&docs)?;
        self.record_event_read(&docs, event_id);
        Ok(docs.events.get(event_id).map(|v| v.event.clone()))
    }

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        // Inserting asserts absence at commit time.
        self.event_reads.entry(event.id.clone()).or_insert(None);
        self.writes.push(Write::PutEvent(event.clone()));
        Ok(())
    }

    async fn put_event(&mut self, event: &Event) -> Result<(), StoreError> {
        self.writes.push(Write::PutEvent(event.clone()));
        Ok(())
    }

    async fn delete_event(&mut self, event_id: &str) -> Result<(), StoreError> {
        self.writes.push(Write::DeleteEvent(event_id.to_string()));
        Ok(())
    }

    async fn get_booking(&mut self, booking_id: &str) -> Result<Option<Booking>, StoreError> {
        if let Some(pending) = self.pending_booking(booking_id) {
            return Ok(pending);
        }
        let docs = Arc::clone(&self.docs);
        let docs = lock_documents(&docs)?;
        let booking = docs.bookings.get(booking_id).cloned();
        self.booking_reads
            .entry(booking_id.to_string())
            .or_insert(booking.is_some());
        Ok(booking)
    }

    async fn bookings_for_event(&mut self, event_id: &str) -> Result<Vec<Booking>, StoreError> {
        let docs = Arc::clone(&self.docs);
        let docs = lock_documents(&docs)?;
        // Every booking write also writes its event, so the event version
        // guards the whole set.
        self.record_event_read(&docs, event_id);
        Ok(self.view_bookings_for_event(&docs, event_id))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        self.booking_reads.entry(booking.id.clone()).or_insert(false);
        self.writes.push(Write::InsertBooking(booking.clone()));
        Ok(())
    }

    async fn delete_booking(&mut self, booking_id: &str) -> Result<(), StoreError> {
        self.writes.push(Write::DeleteBooking(booking_id.to_string()));
        Ok(())
    }

    async fn delete_bookings_for_event(
        &mut self,
        event_id: &str,
    ) -> Result<Vec<Booking>, StoreError> {
        let removed = self.bookings_for_event(event_id).await?;
        self.writes
            .push(Write::DeleteBookingsForEvent(event_id.to_string()));
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let changes = {
            let mut docs = lock_documents(&this.docs)?;
            this.validate(&docs)?;
            apply(&mut docs, this.writes)
        };
        for change in changes {
            this.hub.publish(change);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::tests::complete_details;
    use crate::models::EventDraft;
    use chrono::Utc;

    fn published_event(capacity: Option<u32>) -> Event {
        Event::new(
            "org-1",
            EventDraft {
                details: complete_details(capacity),
                publish: true,
            },
            Utc::now(),
        )
    }

    async fn seed(store: &MemoryStore, event: &Event) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_event(event).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_event_conflict() {
        let store = MemoryStore::new();
        let event = published_event(Some(10));
        seed(&store, &event).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.get_event(&event.id).await.unwrap().unwrap();
        let mut b = second.get_event(&event.id).await.unwrap().unwrap();
        a.tickets_sold += 1;
        b.tickets_sold += 2;
        first.put_event(&a).await.unwrap();
        second.put_event(&b).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        let stored = store.get_event(&event.id).await.unwrap().unwrap();
        assert_eq!(stored.tickets_sold, 1);
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let event = published_event(None);
        seed(&store, &event).await;

        {
            let mut tx = store.begin().await.unwrap();
            let booking = Booking::for_event(&event, "buyer", 1, Utc::now()).unwrap();
            tx.insert_booking(&booking).await.unwrap();
            tx.delete_event(&event.id).await.unwrap();
        }

        assert!(store.get_event(&event.id).await.unwrap().is_some());
        assert!(store
            .list_bookings(&BookingFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        let event = published_event(Some(5));
        seed(&store, &event).await;

        let mut tx = store.begin().await.unwrap();
        let booking = Booking::for_event(&event, "buyer", 2, Utc::now()).unwrap();
        tx.insert_booking(&booking).await.unwrap();
        assert_eq!(tx.bookings_for_event(&event.id).await.unwrap().len(), 1);
        assert_eq!(tx.get_booking(&booking.id).await.unwrap(), Some(booking.clone()));

        tx.delete_event(&event.id).await.unwrap();
        assert_eq!(tx.get_event(&event.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bulk_delete_removes_only_that_event() {
        let store = MemoryStore::new();
        let doomed = published_event(None);
        let kept = published_event(None);
        seed(&store, &doomed).await;
        seed(&store, &kept).await;

        let mut tx = store.begin().await.unwrap();
        for _ in 0..3 {
            tx.insert_booking(&Booking::for_event(&doomed, "buyer", 1, Utc::now()).unwrap())
                .await
                .unwrap();
        }
        tx.insert_booking(&Booking::for_event(&kept, "buyer", 1, Utc::now()).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.delete_bookings_for_event(&doomed.id).await.unwrap().len(), 3);
        tx.commit().await.unwrap();

        let remaining = store.list_bookings(&BookingFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_id, kept.id);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let store = MemoryStore::new();
        let event = published_event(None);
        seed(&store, &event).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_event(&event).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn changes_are_published_only_on_commit() {
        let store = MemoryStore::new();
        let mut changes = store.changes();
        let event = published_event(None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_event(&event).await.unwrap();
        assert!(changes.try_recv().is_err());
        tx.commit().await.unwrap();

        assert_eq!(
            changes.recv().await.unwrap(),
            Change::Event {
                event_id: event.id.clone(),
                organizer_id: "org-1".to_string(),
                kind: ChangeKind::Upserted,
            }
        );
    }
}
