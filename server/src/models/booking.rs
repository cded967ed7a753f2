use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::event::{money_limit, Event, MONEY_SCALE};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            other => Err(format!("unknown booking status '{other}'")),
        }
    }
}

/// One purchase. The `event_*` fields are a snapshot taken at commit time and
/// are never updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub event_id: String,
    pub event_title: String,
    pub event_date: String,
    pub event_location: String,
    pub event_price: Decimal,
    pub cover_image_uri: Option<String>,
    pub purchaser_id: String,
    pub ticket_count: u32,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn for_event(
        event: &Event,
        purchaser_id: impl Into<String>,
        ticket_count: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_id: event.id.clone(),
            event_title: event.title.clone(),
            event_date: event.date.clone(),
            event_location: event.location.clone(),
            event_price: event.price,
            cover_image_uri: event.cover_image_uri.clone(),
            purchaser_id: purchaser_id.into(),
            ticket_count,
            total_amount: total_amount(event.price, ticket_count)?,
            status: BookingStatus::Confirmed,
            created_at: now,
        })
    }
}

/// `price * quantity`, rounded to cents. Fails when the total would not fit
/// the stored money range.
pub fn total_amount(price: Decimal, quantity: u32) -> Result<Decimal, AppError> {
    price
        .checked_mul(Decimal::from(quantity))
        .map(|total| total.round_dp(MONEY_SCALE))
        .filter(|total| *total < money_limit())
        .ok_or_else(|| {
            AppError::ValidationError(format!("order total for {quantity} tickets is too large"))
        })
}
