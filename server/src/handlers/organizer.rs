use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;

use crate::identity::Caller;
use crate::services::analytics::current_month;
use crate::services::Services;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    /// `MM/YYYY`, or `current` for this month.
    pub month: Option<String>,
}

fn require_organizer(caller: &Caller) -> Result<(), AppError> {
    if caller.can_organize() {
        Ok(())
    } else {
        Err(AppError::Forbidden("organizers only".to_string()))
    }
}

pub async fn my_events(
    State(services): State<Services>,
    caller: Caller,
) -> Result<Response, AppError> {
    require_organizer(&caller)?;
    let events = services.catalog.list_for_organizer(&caller.id).await?;
    Ok(success(events, "Events retrieved"))
}

pub async fn analytics(
    State(services): State<Services>,
    caller: Caller,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, AppError> {
    require_organizer(&caller)?;
    let month = match query.month.as_deref().map(str::trim) {
        Some("current") => Some(current_month(Utc::now())),
        Some("") | None => None,
        Some(month) => Some(month.to_string()),
    };
    let report = services
        .analytics
        .report(&caller.id, month.as_deref())
        .await?;
    Ok(success(report, "Analytics retrieved"))
}

pub async fn all_events(
    State(services): State<Services>,
    caller: Caller,
) -> Result<Response, AppError> {
    let events = services.catalog.list_all(&caller).await?;
    Ok(success(events, "Events retrieved"))
}
