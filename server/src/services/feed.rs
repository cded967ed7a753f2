//! Restartable snapshot streams over the store's change notifications.
//!
//! A feed yields the current snapshot first, then a fresh one after every
//! committed change that could affect it. Dropping the stream unsubscribes.

use futures::stream::BoxStream;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::register::live_only;
use crate::models::{Booking, Event};
use crate::store::{BookingFilter, Change, DocumentStore, EventFilter, StoreError};
use crate::utils::error::AppError;

pub type Snapshots<T> = BoxStream<'static, Result<Vec<T>, AppError>>;

#[derive(Clone)]
pub struct LiveFeed {
    store: Arc<dyn DocumentStore>,
}

impl LiveFeed {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn bookings(&self, filter: BookingFilter) -> Snapshots<Booking> {
        let store = Arc::clone(&self.store);
        let relevant = filter.clone();
        watch(
            Arc::clone(&self.store),
            move |change| change.touches_bookings(&relevant),
            move || {
                let store = Arc::clone(&store);
                let filter = filter.clone();
                async move { store.list_bookings(&filter).await }
            },
        )
    }

    /// One purchaser's bookings, hiding those whose event is gone. Same view
    /// as `BookingRegister::list_live_for_purchaser`.
    pub fn live_bookings(&self, purchaser_id: &str) -> Snapshots<Booking> {
        let store = Arc::clone(&self.store);
        let filter = BookingFilter::purchaser(purchaser_id);
        let relevant = filter.clone();
        watch(
            Arc::clone(&self.store),
            move |change| change.touches_bookings(&relevant),
            move || {
                let store = Arc::clone(&store);
                let filter = filter.clone();
                async move {
                    let bookings = store.list_bookings(&filter).await?;
                    live_only(store.as_ref(), bookings).await
                }
            },
        )
    }

    pub fn events(&self, filter: EventFilter) -> Snapshots<Event> {
        let store = Arc::clone(&self.store);
        let relevant = filter.clone();
        watch(
            Arc::clone(&self.store),
            move |change| change.touches_events(&relevant),
            move || {
                let store = Arc::clone(&store);
                let filter = filter.clone();
                async move { store.list_events(&filter).await }
            },
        )
    }
}

fn watch<T, P, F, Fut>(store: Arc<dyn DocumentStore>, relevant: P, snapshot: F) -> Snapshots<T>
where
    T: Send + 'static,
    P: Fn(&Change) -> bool + Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<T>, StoreError>> + Send,
{
    Box::pin(async_stream::stream! {
        // Subscribe before the first read so no commit slips between them.
        let mut changes = store.changes();
        'feed: loop {
            match snapshot().await {
                Ok(items) => yield Ok(items),
                Err(e) => {
                    yield Err(AppError::from(e));
                    break 'feed;
                }
            }

            loop {
                match changes.recv().await {
                    Ok(change) if relevant(&change) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Feed lagged behind, resyncing");
                        break;
                    }
                    Err(RecvError::Closed) => break 'feed,
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::tests::complete_details;
    use crate::models::EventDraft;
    use crate::services::{BookingService, RetryPolicy};
    use crate::store::MemoryStore;
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    async fn next<T>(feed: &mut Snapshots<T>) -> Vec<T> {
        tokio::time::timeout(Duration::from_secs(2), feed.next())
            .await
            .expect("feed stalled")
            .expect("feed ended")
            .expect("feed failed")
    }

    async fn seed(store: &MemoryStore, title: &str) -> Event {
        let mut details = complete_details(Some(10));
        details.title = title.to_string();
        let event = Event::new(
            "org-1",
            EventDraft {
                details,
                publish: true,
            },
            Utc::now(),
        );
        let mut tx = store.begin().await.unwrap();
        tx.insert_event(&event).await.unwrap();
        tx.commit().await.unwrap();
        event
    }

    #[tokio::test]
    async fn booking_feed_follows_purchases() {
        let store = Arc::new(MemoryStore::new());
        let event = seed(&store, "Jazz Night").await;
        let feed = LiveFeed::new(store.clone());
        let bookings = BookingService::new(store.clone(), RetryPolicy::default());

        let mut mine = feed.bookings(BookingFilter::purchaser("alice"));
        assert!(next(&mut mine).await.is_empty());

        bookings.purchase(&event.id, "bob", 1).await.unwrap();
        bookings.purchase(&event.id, "alice", 2).await.unwrap();

        let snapshot = next(&mut mine).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].ticket_count, 2);
    }

    #[tokio::test]
    async fn live_booking_feed_hides_orphaned_bookings() {
        let store = Arc::new(MemoryStore::new());
        let kept = seed(&store, "Kept").await;
        let doomed = seed(&store, "Doomed").await;
        let bookings = BookingService::new(store.clone(), RetryPolicy::default());
        bookings.purchase(&kept.id, "alice", 1).await.unwrap();
        bookings.purchase(&doomed.id, "alice", 2).await.unwrap();

        let feed = LiveFeed::new(store.clone());
        let mut mine = feed.live_bookings("alice");
        assert_eq!(next(&mut mine).await.len(), 2);

        // The event goes away while its booking is still stored.
        let mut tx = store.begin().await.unwrap();
        tx.get_event(&doomed.id).await.unwrap();
        tx.delete_event(&doomed.id).await.unwrap();
        tx.commit().await.unwrap();

        let snapshot = next(&mut mine).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].event_id, kept.id);
        assert_eq!(
            store
                .list_bookings(&BookingFilter::purchaser("alice"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn event_feed_sees_new_and_sold_events() {
        let store = Arc::new(MemoryStore::new());
        let feed = LiveFeed::new(store.clone());

        let mut published = feed.events(EventFilter::published());
        assert!(next(&mut published).await.is_empty());

        let event = seed(&store, "Food Fair").await;
        assert_eq!(next(&mut published).await, vec![event.clone()]);

        BookingService::new(store.clone(), RetryPolicy::default())
            .purchase(&event.id, "alice", 3)
            .await
            .unwrap();
        assert_eq!(next(&mut published).await[0].tickets_sold, 3);
    }

    #[tokio::test]
    async fn restarting_a_feed_starts_from_the_current_state() {
        let store = Arc::new(MemoryStore::new());
        let feed = LiveFeed::new(store.clone());
        seed(&store, "First").await;

        let mut first = feed.events(EventFilter::default());
        assert_eq!(next(&mut first).await.len(), 1);
        drop(first);

        seed(&store, "Second").await;
        let mut again = feed.events(EventFilter::default());
        assert_eq!(next(&mut again).await.len(), 2);
    }
}
