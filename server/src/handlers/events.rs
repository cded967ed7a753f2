use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Serialize;

use super::json_body;
use crate::identity::{Caller, RequestIdentity};
use crate::models::{EventDetails, EventDraft};
use crate::services::{Remaining, Services};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

#[derive(Serialize)]
struct Availability {
    event_id: String,
    remaining: Remaining,
}

pub async fn list_published(State(services): State<Services>) -> Result<Response, AppError> {
    let events = services.catalog.list_published().await?;
    Ok(success(events, "Events retrieved"))
}

pub async fn create_event(
    State(services): State<Services>,
    caller: Caller,
    payload: Result<Json<EventDraft>, JsonRejection>,
) -> Result<Response, AppError> {
    let draft = json_body(payload)?;
    let event = services.catalog.create(&caller, draft).await?;
    Ok(created(event, "Event created"))
}

pub async fn get_event(
    State(services): State<Services>,
    RequestIdentity(caller): RequestIdentity,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    let event = services.catalog.get(caller.as_ref(), &event_id).await?;
    Ok(success(event, "Event retrieved"))
}

pub async fn update_event(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
    payload: Result<Json<EventDetails>, JsonRejection>,
) -> Result<Response, AppError> {
    let details = json_body(payload)?;
    let event = services.catalog.update(&caller, &event_id, details).await?;
    Ok(success(event, "Event updated"))
}

pub async fn publish_event(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    let event = services.catalog.publish(&caller, &event_id).await?;
    Ok(success(event, "Event published"))
}

pub async fn delete_event(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    let report = services.catalog.delete(&caller, &event_id).await?;
    Ok(success(report, "Event deleted"))
}

pub async fn availability(
    State(services): State<Services>,
    RequestIdentity(caller): RequestIdentity,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    // Goes through the catalog so drafts stay hidden.
    let event = services.catalog.get(caller.as_ref(), &event_id).await?;
    let remaining = services.ledger.remaining(&event.id).await?;
    Ok(success(
        Availability {
            event_id: event.id,
            remaining,
        },
        "Availability retrieved",
    ))
}

pub async fn audit(
    State(services): State<Services>,
    caller: Caller,
    Path(event_id): Path<String>,
) -> Result<Response, AppError> {
    services.catalog.get_managed(&caller, &event_id).await?;
    let audit = services.ledger.audit(&event_id).await?;
    Ok(success(audit, "Ledger audit"))
}
