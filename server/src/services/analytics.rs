//! Organizer sales figures.
//!
//! Figures come from live bookings, the way the organizer dashboard shows
//! them. The cached counter is reported next to them for comparison.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Event, EventStatus};
use crate::store::{BookingFilter, DocumentStore, EventFilter};
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSales {
    pub event_id: String,
    pub title: String,
    pub date: String,
    /// Sum over live bookings.
    pub tickets_sold: u32,
    pub cached_tickets_sold: u32,
    pub tickets_total: Option<u32>,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesReport {
    pub organizer_id: String,
    /// `MM/YYYY` when the report is limited to one month.
    pub month: Option<String>,
    pub published_events: usize,
    pub draft_events: usize,
    pub orders: usize,
    pub total_tickets_sold: u32,
    pub total_revenue: Decimal,
    /// Best sellers first.
    pub events: Vec<EventSales>,
}

#[derive(Clone)]
pub struct OrganizerAnalytics {
    store: Arc<dyn DocumentStore>,
}

impl OrganizerAnalytics {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn report(
        &self,
        organizer_id: &str,
        month: Option<&str>,
    ) -> Result<SalesReport, AppError> {
        let month = month.map(normalize_month).transpose()?;
        let events = self
            .store
            .list_events(&EventFilter::organizer(organizer_id))
            .await?;

        let published_events = events.iter().filter(|e| e.is_published()).count();
        let draft_events = events
            .iter()
            .filter(|e| e.status == EventStatus::Draft)
            .count();

        let in_scope: Vec<&Event> = events
            .iter()
            .filter(|e| e.is_published())
            .filter(|e| month.as_deref().map_or(true, |m| event_month(&e.date).as_deref() == Some(m)))
            .collect();

        let mut sales = Vec::with_capacity(in_scope.len());
        let mut orders = 0;
        for event in in_scope {
            let bookings = self
                .store
                .list_bookings(&BookingFilter::event(event.id.as_str()))
                .await?;
            orders += bookings.len();
            sales.push(EventSales {
                event_id: event.id.clone(),
                title: event.title.clone(),
                date: event.date.clone(),
                tickets_sold: bookings.iter().map(|b| b.ticket_count).sum(),
                cached_tickets_sold: event.tickets_sold,
                tickets_total: event.tickets_total,
                revenue: bookings.iter().map(|b| b.total_amount).sum(),
            });
        }
        sales.sort_by(|a, b| {
            b.tickets_sold
                .cmp(&a.tickets_sold)
                .then_with(|| b.revenue.cmp(&a.revenue))
        });

        Ok(SalesReport {
            organizer_id: organizer_id.to_string(),
            month,
            published_events,
            draft_events,
            orders,
            total_tickets_sold: sales.iter().map(|s| s.tickets_sold).sum(),
            total_revenue: sales.iter().map(|s| s.revenue).sum(),
            events: sales,
        })
    }
}

/// `MM/YYYY` for `now`.
pub fn current_month(now: DateTime<Utc>) -> String {
    format!("{:02}/{}", now.month(), now.year())
}

/// `M/YYYY` or `MM/YYYY` to `MM/YYYY`.
fn normalize_month(raw: &str) -> Result<String, AppError> {
    let invalid = || AppError::ValidationError(format!("month must look like MM/YYYY, got '{raw}'"));
    let (mm, yyyy) = raw.trim().split_once('/').ok_or_else(invalid)?;
    let mm: u32 = mm.parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&mm) || yyyy.len() != 4 || !yyyy.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    Ok(format!("{mm:02}/{yyyy}"))
}

/// Month of an event date written as `MM/DD/YYYY`. Anything else has no month.
fn event_month(date: &str) -> Option<String> {
    let mut parts = date.trim().split('/');
    let mm = parts.next()?;
    let _dd = parts.next()?;
    let yyyy = parts.next()?;
    normalize_month(&format!("{mm}/{yyyy}")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Caller, Role};
    use crate::media::MemoryBlobStorage;
    use crate::models::event::tests::complete_details;
    use crate::models::EventDraft;
    use crate::services::{BookingService, EventCatalog, RetryPolicy};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[test]
    fn months_are_normalized() {
        assert_eq!(normalize_month("3/2026").unwrap(), "03/2026");
        assert_eq!(normalize_month("11/2026").unwrap(), "11/2026");
        assert!(normalize_month("13/2026").is_err());
        assert!(normalize_month("2026-11").is_err());
        assert_eq!(event_month("11/20/2026").as_deref(), Some("11/2026"));
        assert_eq!(event_month("Nov 20").as_deref(), None);
        assert_eq!(
            current_month(Utc.with_ymd_and_hms(2026, 4, 9, 12, 0, 0).unwrap()),
            "04/2026"
        );
    }

    #[tokio::test]
    async fn report_sums_live_bookings_of_published_events() {
        let store = Arc::new(MemoryStore::new());
        let catalog = EventCatalog::new(
            store.clone(),
            Arc::new(MemoryBlobStorage::new("https://media.test")),
            RetryPolicy::default(),
        );
        let bookings = BookingService::new(store.clone(), RetryPolicy::default());
        let organizer = Caller::new("org-1", Role::Organizer);

        let jazz = catalog
            .create(
                &organizer,
                EventDraft {
                    details: complete_details(Some(100)),
                    publish: true,
                },
            )
            .await
            .unwrap();
        let mut spring = complete_details(None);
        spring.title = "Spring Food Fair".to_string();
        spring.date = "4/12/2026".to_string();
        let fair = catalog
            .create(
                &organizer,
                EventDraft {
                    details: spring,
                    publish: true,
                },
            )
            .await
            .unwrap();
        catalog
            .create(
                &organizer,
                EventDraft {
                    details: complete_details(Some(10)),
                    publish: false,
                },
            )
            .await
            .unwrap();

        bookings.purchase(&jazz.id, "a", 2).await.unwrap();
        bookings.purchase(&fair.id, "b", 3).await.unwrap();
        bookings.purchase(&fair.id, "c", 1).await.unwrap();

        let analytics = OrganizerAnalytics::new(store);
        let overall = analytics.report("org-1", None).await.unwrap();

        assert_eq!(overall.published_events, 2);
        assert_eq!(overall.draft_events, 1);
        assert_eq!(overall.orders, 3);
        assert_eq!(overall.total_tickets_sold, 6);
        assert_eq!(overall.total_revenue, jazz.price * Decimal::from(6));
        assert_eq!(overall.events[0].event_id, fair.id);
        assert_eq!(overall.events[0].tickets_sold, overall.events[0].cached_tickets_sold);

        let april = analytics.report("org-1", Some("4/2026")).await.unwrap();
        assert_eq!(april.month.as_deref(), Some("04/2026"));
        assert_eq!(april.events.len(), 1);
        assert_eq!(april.total_tickets_sold, 4);

        let other = analytics.report("org-2", None).await.unwrap();
        assert_eq!(other.total_revenue, Decimal::ZERO);
        assert!(other.events.is_empty());
    }
}
