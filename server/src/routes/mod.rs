use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, with_security_headers, Config};
use crate::handlers::{bookings, events, health_check, media, organizer, stream};
use crate::services::Services;

const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

pub fn create_routes(services: Services, config: &Config) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route(
            "/events",
            get(events::list_published).post(events::create_event),
        )
        .route("/events/stream", get(stream::published_events))
        .route(
            "/events/:id",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/events/:id/publish", post(events::publish_event))
        .route("/events/:id/availability", get(events::availability))
        .route("/events/:id/audit", get(events::audit))
        .route(
            "/events/:id/bookings",
            get(bookings::list_for_event)
                .post(bookings::purchase)
                .delete(bookings::clear_for_event),
        )
        .route("/bookings/me", get(bookings::my_bookings))
        .route("/bookings/me/stream", get(stream::my_bookings))
        .route("/bookings/:id", delete(bookings::cancel))
        .route("/organizer/events", get(organizer::my_events))
        .route("/organizer/analytics", get(organizer::analytics))
        .route("/admin/events", get(organizer::all_events))
        .route(
            "/media",
            post(media::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/media/:id", get(media::download))
        .with_state(services);

    with_security_headers(router, config.production)
        .layer(create_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}
