//! PostgreSQL backend.
//!
//! Transactions lock the event row with `SELECT ... FOR UPDATE`, which
//! serializes every purchase, cancellation and cascade on the same event.
//! Change notifications are sent with `pg_notify` inside the transaction so
//! they are only delivered if it commits, and a [`PgListener`] task fans them
//! out to local subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgListener, PgPool};
use sqlx::{FromRow, Postgres, Transaction};
use tokio::sync::broadcast;

use super::{
    BookingFilter, Change, ChangeHub, ChangeKind, DocumentStore, EventFilter, StoreError,
    StoreTransaction,
};
use crate::models::{Booking, Event};

pub const CHANGES_CHANNEL: &str = "eventghar_changes";

const EVENT_COLUMNS: &str = "id, organizer_id, title, category, event_date, event_time, location, \
    description, price, tickets_total, tickets_sold, cover_image_uri, status, created_at, updated_at";

const BOOKING_COLUMNS: &str = "id, event_id, event_title, event_date, event_location, event_price, \
    cover_image_uri, purchaser_id, ticket_count, total_amount, status, created_at";

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    organizer_id: String,
    title: String,
    category: String,
    event_date: String,
    event_time: String,
    location: String,
    description: String,
    price: Decimal,
    tickets_total: Option<i32>,
    tickets_sold: i32,
    cover_image_uri: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            tickets_total: row
                .tickets_total
                .map(|total| to_count(total, "tickets_total", &row.id))
                .transpose()?,
            tickets_sold: to_count(row.tickets_sold, "tickets_sold", &row.id)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            id: row.id,
            organizer_id: row.organizer_id,
            title: row.title,
            category: row.category,
            date: row.event_date,
            time: row.event_time,
            location: row.location,
            description: row.description,
            price: row.price,
            cover_image_uri: row.cover_image_uri,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BookingRow {
    id: String,
    event_id: String,
    event_title: String,
    event_date: String,
    event_location: String,
    event_price: Decimal,
    cover_image_uri: Option<String>,
    purchaser_id: String,
    ticket_count: i32,
    total_amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            ticket_count: to_count(row.ticket_count, "ticket_count", &row.id)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            id: row.id,
            event_id: row.event_id,
            event_title: row.event_title,
            event_date: row.event_date,
            event_location: row.event_location,
            event_price: row.event_price,
            cover_image_uri: row.cover_image_uri,
            purchaser_id: row.purchaser_id,
            total_amount: row.total_amount,
            created_at: row.created_at,
        })
    }
}

fn to_count(value: i32, column: &str, id: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} of '{id}' is negative: {value}")))
}

fn to_column(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

/// Sorts a sqlx error into the store's categories.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected, unique_violation
            Some("40001") | Some("40P01") | Some("23505") => StoreError::Conflict(db.message().to_string()),
            _ => StoreError::Database(err),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Database(err),
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    hub: ChangeHub,
}

impl PgStore {
    /// Wraps the pool and starts relaying `pg_notify` messages to local
    /// subscribers.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        let mut listener = PgListener::connect_with(&pool).await.map_err(classify)?;
        listener.listen(CHANGES_CHANNEL).await.map_err(classify)?;

        let hub = ChangeHub::new();
        let relay = hub.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<Change>(notification.payload()) {
                            Ok(change) => relay.publish(change),
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping malformed change notification")
                            }
                        }
                    }
                    Err(e) => {
                        // recv reconnects on the next call
                        tracing::warn!(error = %e, "Change listener interrupted");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self { pool, hub })
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(PgTransaction {
            tx,
            pending: Vec::new(),
        }))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;
        row.map(Event::try_from).transpose()
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE ($1::text IS NULL OR status = $1) AND ($2::text IS NULL OR organizer_id = $2) \
             ORDER BY created_at DESC, id"
        ))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.organizer_id.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE ($1::text IS NULL OR purchaser_id = $1) AND ($2::text IS NULL OR event_id = $2) \
             ORDER BY created_at DESC, id"
        ))
        .bind(filter.purchaser_id.as_deref())
        .bind(filter.event_id.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.hub.subscribe()
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    pending: Vec<Change>,
}

impl PgTransaction {
    fn booking_change(booking: &Booking, kind: ChangeKind) -> Change {
        Change::Booking {
            booking_id: booking.id.clone(),
            event_id: booking.event_id.clone(),
            purchaser_id: booking.purchaser_id.clone(),
            kind,
        }
    }

    async fn write_event(&mut self, event: &Event, insert: bool) -> Result<(), StoreError> {
        let sql = if insert {
            "INSERT INTO events (id, organizer_id, title, category, event_date, event_time, location, \
             description, price, tickets_total, tickets_sold, cover_image_uri, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        } else {
            "UPDATE events SET organizer_id = $2, title = $3, category = $4, event_date = $5, \
             event_time = $6, location = $7, description = $8, price = $9, tickets_total = $10, \
             tickets_sold = $11, cover_image_uri = $12, status = $13, created_at = $14, updated_at = $15 \
             WHERE id = $1"
        };
        let tickets_total = event
            .tickets_total
            .map(|total| to_column(total, "tickets_total"))
            .transpose()?;
        sqlx::query(sql)
            .bind(&event.id)
            .bind(&event.organizer_id)
            .bind(&event.title)
            .bind(&event.category)
            .bind(&event.date)
            .bind(&event.time)
            .bind(&event.location)
            .bind(&event.description)
            .bind(event.price)
            .bind(tickets_total)
            .bind(to_column(event.tickets_sold, "tickets_sold")?)
            .bind(&event.cover_image_uri)
            .bind(event.status.as_str())
            .bind(event.created_at)
            .bind(event.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        self.pending.push(Change::Event {
            event_id: event.id.clone(),
            organizer_id: event.organizer_id.clone(),
            kind: ChangeKind::Upserted,
        });
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn get_event(&mut self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE"
        ))
        .bind(event_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        row.map(Event::try_from).transpose()
    }

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        self.write_event(event, true).await
    }

    async fn put_event(&mut self, event: &Event) -> Result<(), StoreError> {
        self.write_event(event, false).await
    }

    async fn delete_event(&mut self, event_id: &str) -> Result<(), StoreError> {
        let organizer: Option<(String,)> =
            sqlx::query_as("DELETE FROM events WHERE id = $1 RETURNING organizer_id")
                .bind(event_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(classify)?;
        if let Some((organizer_id,)) = organizer {
            self.pending.push(Change::Event {
                event_id: event_id.to_string(),
                organizer_id,
                kind: ChangeKind::Deleted,
            });
        }
        Ok(())
    }

    async fn get_booking(&mut self, booking_id: &str) -> Result<Option<Booking>, StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        row.map(Booking::try_from).transpose()
    }

    async fn bookings_for_event(&mut self, event_id: &str) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE event_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(event_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;
        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings (id, event_id, event_title, event_date, event_location, event_price, \
             cover_image_uri, purchaser_id, ticket_count, total_amount, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&booking.id)
        .bind(&booking.event_id)
        .bind(&booking.event_title)
        .bind(&booking.event_date)
        .bind(&booking.event_location)
        .bind(booking.event_price)
        .bind(&booking.cover_image_uri)
        .bind(&booking.purchaser_id)
        .bind(to_column(booking.ticket_count, "ticket_count")?)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        self.pending
            .push(Self::booking_change(booking, ChangeKind::Upserted));
        Ok(())
    }

    async fn delete_booking(&mut self, booking_id: &str) -> Result<(), StoreError> {
        let row: Option<BookingRow> = sqlx::query_as(&format!(
            "DELETE FROM bookings WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;
        if let Some(row) = row {
            let booking = Booking::try_from(row)?;
            self.pending
                .push(Self::booking_change(&booking, ChangeKind::Deleted));
        }
        Ok(())
    }

    async fn delete_bookings_for_event(
        &mut self,
        event_id: &str,
    ) -> Result<Vec<Booking>, StoreError> {
        let rows: Vec<BookingRow> = sqlx::query_as(&format!(
            "DELETE FROM bookings WHERE event_id = $1 RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(event_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(classify)?;
        let mut removed = Vec::with_capacity(rows.len());
        for row in rows {
            let booking = Booking::try_from(row)?;
            self.pending
                .push(Self::booking_change(&booking, ChangeKind::Deleted));
            removed.push(booking);
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTransaction { mut tx, pending } = *self;
        for change in &pending {
            let payload = serde_json::to_string(change)
                .map_err(|e| StoreError::Corrupt(format!("unencodable change: {e}")))?;
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(CHANGES_CHANNEL)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }
}
