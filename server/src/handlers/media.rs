use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::identity::Caller;
use crate::services::Services;
use crate::utils::error::AppError;
use crate::utils::response::created;

#[derive(Serialize)]
struct Uploaded {
    url: String,
}

/// Stores a cover image sent as the raw request body.
pub async fn upload(
    State(services): State<Services>,
    caller: Caller,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    if !caller.can_organize() {
        return Err(AppError::Forbidden(
            "only organizers can upload cover images".to_string(),
        ));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let url = services.media.upload(body.to_vec(), content_type).await?;
    tracing::info!(uploaded_by = %caller.id, %url, bytes = body.len(), "Cover image uploaded");
    Ok(created(Uploaded { url }, "Image uploaded"))
}

/// Serves a stored cover image with the content type it was uploaded with.
pub async fn download(
    State(services): State<Services>,
    Path(blob_id): Path<String>,
) -> Result<Response, AppError> {
    let blob = services.media.fetch(&blob_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, blob.content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        blob.bytes,
    )
        .into_response())
}
