//! Server-sent event feeds.
//!
//! Every `snapshot` event carries the full current list as JSON. A failed
//! read sends one `error` event with the error code and ends the feed; the
//! client reconnects to restart it.

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::identity::Caller;
use crate::services::feed::Snapshots;
use crate::services::Services;
use crate::store::EventFilter;

type SseStream = Sse<std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, axum::Error>> + Send>>>;

fn to_sse<T>(snapshots: Snapshots<T>) -> SseStream
where
    T: Serialize + Send + 'static,
{
    let events = snapshots.map(|snapshot| match snapshot {
        Ok(items) => SseEvent::default().event("snapshot").json_data(&items),
        Err(e) => {
            tracing::warn!(error = %e, "Live feed failed");
            Ok(SseEvent::default().event("error").data(e.code()))
        }
    });
    Sse::new(events.boxed()).keep_alive(KeepAlive::default())
}

pub async fn published_events(State(services): State<Services>) -> SseStream {
    to_sse(services.feed.events(EventFilter::published()))
}

pub async fn my_bookings(State(services): State<Services>, caller: Caller) -> SseStream {
    to_sse(services.feed.live_bookings(&caller.id))
}
