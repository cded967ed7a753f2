use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::json_body;
use crate::identity::Caller;
use crate::services::Services;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Signed so that `0` and negatives get a validation error instead of a
    /// deserialization failure.
    pub quantity: i64,
}

pub async fn purchase(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
    payload: Result<Json<PurchaseRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let request = json_body(payload)?;
    if request.quantity < 1 {
        return Err(AppError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }
    let quantity = u32::try_from(request.quantity)
        .map_err(|_| AppError::ValidationError("quantity is too large".to_string()))?;

    let booking = services
        .bookings
        .purchase_as(&caller, &event_id, quantity)
        .await?;
    Ok(created(booking, "Booking confirmed"))
}

pub async fn list_for_event(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    services.catalog.get_managed(&caller, &event_id).await?;
    let bookings = services.register.list_by_event(&event_id).await?;
    Ok(success(bookings, "Bookings retrieved"))
}

#[derive(Serialize)]
struct Cleared {
    event_id: String,
    bookings_removed: u64,
}

/// Removes every booking of an event and returns the tickets to it.
pub async fn clear_for_event(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    let bookings_removed = services
        .register
        .delete_all_for_event(&event_id, &caller)
        .await?;
    Ok(success(
        Cleared {
            event_id,
            bookings_removed,
        },
        "Bookings removed",
    ))
}

pub async fn my_bookings(
    State(services): State<Services>,
    caller: Caller,
) -> Result<Response, AppError> {
    let bookings = services.register.list_live_for_purchaser(&caller.id).await?;
    Ok(success(bookings, "Bookings retrieved"))
}

pub async fn cancel(
    State(services): State<Services>,
    caller: Caller,
    Path(booking_id): Path<String>,
) -> Result<Response, AppError> {
    let booking = services.register.cancel(&booking_id, &caller).await?;
    Ok(success(booking, "Booking cancelled"))
}
