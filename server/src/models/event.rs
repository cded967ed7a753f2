use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::AppError;

const MIN_TITLE_LEN: usize = 3;
const MIN_CATEGORY_LEN: usize = 3;
const MIN_LOCATION_LEN: usize = 3;

/// Ticket counters are stored in `INTEGER` columns.
pub const MAX_TICKETS: u32 = i32::MAX as u32;

/// Money is stored as `NUMERIC(12, 2)`: two decimal places, below 10^10.
pub const MONEY_SCALE: u32 = 2;

pub fn money_limit() -> Decimal {
    Decimal::from(10_000_000_000_i64)
}

/// Lifecycle state of an event. Published events never go back to draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// An event document.
///
/// `tickets_total` is `None` for unlimited capacity. `tickets_sold` is the
/// ledger counter: it is only written by purchase, cancellation and cascade
/// transactions, never by organizer edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub organizer_id: String,
    pub title: String,
    pub category: String,
    pub date: String,
    pub time: String,
    pub location: String,
    pub description: String,
    pub price: Decimal,
    pub tickets_total: Option<u32>,
    pub tickets_sold: u32,
    pub cover_image_uri: Option<String>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Builds a fresh event owned by `organizer_id` with an empty ledger.
    pub fn new(organizer_id: impl Into<String>, draft: EventDraft, now: DateTime<Utc>) -> Self {
        let status = if draft.publish {
            EventStatus::Published
        } else {
            EventStatus::Draft
        };
        let mut event = Self {
            id: uuid::Uuid::new_v4().to_string(),
            organizer_id: organizer_id.into(),
            title: String::new(),
            category: String::new(),
            date: String::new(),
            time: String::new(),
            location: String::new(),
            description: String::new(),
            price: Decimal::ZERO,
            tickets_total: None,
            tickets_sold: 0,
            cover_image_uri: None,
            status,
            created_at: now,
            updated_at: now,
        };
        event.apply_details(draft.details, now);
        event
    }

    pub fn is_published(&self) -> bool {
        self.status == EventStatus::Published
    }

    /// Replaces every organizer-editable field. Ledger, status and ownership
    /// are left as they are.
    pub fn apply_details(&mut self, details: EventDetails, now: DateTime<Utc>) {
        self.title = details.title.trim().to_string();
        self.category = details.category.trim().to_string();
        self.date = details.date.trim().to_string();
        self.time = details.time.trim().to_string();
        self.location = details.location.trim().to_string();
        self.description = details.description;
        self.price = details.price;
        self.tickets_total = details.tickets_total;
        self.cover_image_uri = details.cover_image_uri.filter(|uri| !uri.trim().is_empty());
        self.updated_at = now;
    }

    pub fn details(&self) -> EventDetails {
        EventDetails {
            title: self.title.clone(),
            category: self.category.clone(),
            date: self.date.clone(),
            time: self.time.clone(),
            location: self.location.clone(),
            description: self.description.clone(),
            price: self.price,
            tickets_total: self.tickets_total,
            cover_image_uri: self.cover_image_uri.clone(),
        }
    }
}

/// The organizer-editable part of an event, as submitted by the manage-event form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetails {
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: Decimal,
    /// Omitted or `null` means unlimited capacity.
    #[serde(default)]
    pub tickets_total: Option<u32>,
    #[serde(default)]
    pub cover_image_uri: Option<String>,
}

impl EventDetails {
    /// Structural checks every saved event must pass, drafts included.
    pub fn validate_structure(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();
        if self.title.trim().is_empty() {
            problems.push("title is required".to_string());
        }
        if self.price.is_sign_negative() {
            problems.push("price cannot be negative".to_string());
        }
        if self.price.normalize().scale() > MONEY_SCALE {
            problems.push(format!("price can have at most {MONEY_SCALE} decimal places"));
        }
        if self.price >= money_limit() {
            problems.push(format!("price must be below {}", money_limit()));
        }
        match self.tickets_total {
            Some(0) => {
                problems.push("capacity must be positive; omit it for unlimited".to_string())
            }
            Some(total) if total > MAX_TICKETS => {
                problems.push(format!("capacity cannot exceed {MAX_TICKETS}"))
            }
            _ => {}
        }
        into_validation(problems)
    }

    /// Completeness gate for publishing.
    pub fn validate_for_publish(&self) -> Result<(), AppError> {
        let mut problems = Vec::new();
        if self.title.trim().chars().count() < MIN_TITLE_LEN {
            problems.push(format!("title must be at least {MIN_TITLE_LEN} characters"));
        }
        if self.category.trim().chars().count() < MIN_CATEGORY_LEN {
            problems.push("category is required".to_string());
        }
        if self.date.trim().is_empty() {
            problems.push("date is required".to_string());
        }
        if self.time.trim().is_empty() {
            problems.push("time is required".to_string());
        }
        if self.location.trim().chars().count() < MIN_LOCATION_LEN {
            problems.push(format!("venue must be at least {MIN_LOCATION_LEN} characters"));
        }
        if self.price <= Decimal::ZERO {
            problems.push("price must be greater than zero".to_string());
        }
        if self.tickets_total == Some(0) {
            problems.push("capacity must be positive; omit it for unlimited".to_string());
        }
        if self
            .cover_image_uri
            .as_deref()
            .map_or(true, |uri| uri.trim().is_empty())
        {
            problems.push("cover image is required".to_string());
        }
        into_validation(problems)
    }
}

/// Input for creating an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(flatten)]
    pub details: EventDetails,
    /// Publish immediately instead of saving as draft.
    #[serde(default)]
    pub publish: bool,
}

fn into_validation(problems: Vec<String>) -> Result<(), AppError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::ValidationError(problems.join("; ")))
    }
}
