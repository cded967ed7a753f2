use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use eventghar_server::config::Config;
use eventghar_server::identity::{CALLER_ID_HEADER, CALLER_ROLE_HEADER};
use eventghar_server::media::MemoryBlobStorage;
use eventghar_server::routes::create_routes;
use eventghar_server::services::{RetryPolicy, Services};
use eventghar_server::store::MemoryStore;

fn app() -> Router {
    let services = Services::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryBlobStorage::new("https://media.test")),
        RetryPolicy::default(),
    );
    create_routes(services, &Config::default())
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = caller {
        request = request
            .header(CALLER_ID_HEADER, id)
            .header(CALLER_ROLE_HEADER, role);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

const ORGANIZER: Option<(&str, &str)> = Some(("org-1", "organizer"));

fn event_body(tickets_total: Option<u32>, publish: bool) -> Value {
    json!({
        "title": "Kathmandu Jazz Night",
        "category": "Music",
        "date": "11/20/2026",
        "time": "19:00",
        "location": "Patan Durbar Square",
        "description": "Live jazz under the stars",
        "price": "1500.00",
        "tickets_total": tickets_total,
        "cover_image_uri": "https://cdn.example.com/jazz.jpg",
        "publish": publish,
    })
}

async fn create_event(app: &Router, tickets_total: Option<u32>) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/events",
        ORGANIZER,
        Some(event_body(tickets_total, true)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_check_carries_security_headers() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

#[tokio::test]
async fn purchase_then_list_my_bookings() {
    let app = app();
    let event_id = create_event(&app, Some(5)).await;
    let buyer = Some(("buyer-1", "user"));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/events/{event_id}/bookings"),
        buyer,
        Some(json!({ "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["ticket_count"], 2);
    assert_eq!(body["data"]["total_amount"], "3000.00");
    assert_eq!(body["data"]["status"], "confirmed");

    let (status, body) = send(&app, "GET", "/bookings/me", buyer, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(
        &app,
        "GET",
        &format!("/events/{event_id}/availability"),
        None,
        None,
    )
    .await;
    assert_eq!(body["data"]["remaining"], json!({ "kind": "finite", "tickets": 3 }));
}

#[tokio::test]
async fn sold_out_is_a_conflict_with_remaining_count() {
    let app = app();
    let event_id = create_event(&app, Some(2)).await;
    let uri = format!("/events/{event_id}/bookings");

    let (status, _) = send(&app, "POST", &uri, Some(("a", "user")), Some(json!({ "quantity": 2 }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", &uri, Some(("b", "user")), Some(json!({ "quantity": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "SOLD_OUT");
    assert_eq!(body["error"]["details"]["remaining"], 0);
}

#[tokio::test]
async fn anonymous_purchase_is_unauthorized() {
    let app = app();
    let event_id = create_event(&app, Some(2)).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/events/{event_id}/bookings"),
        None,
        Some(json!({ "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");
}

#[tokio::test]
async fn bad_quantities_are_rejected() {
    let app = app();
    let event_id = create_event(&app, Some(2)).await;
    let uri = format!("/events/{event_id}/bookings");

    for quantity in [json!(0), json!(-3), json!("two")] {
        let (status, body) = send(
            &app,
            "POST",
            &uri,
            Some(("a", "user")),
            Some(json!({ "quantity": quantity })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn incomplete_draft_cannot_be_published() {
    let app = app();
    let mut draft = event_body(Some(10), false);
    draft["cover_image_uri"] = Value::Null;

    let (status, body) = send(&app, "POST", "/events", ORGANIZER, Some(draft)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "draft");
    let event_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/events/{event_id}/publish"),
        ORGANIZER,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("cover image"));

    // Drafts are not listed publicly.
    let (_, body) = send(&app, "GET", "/events", None, None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn deleting_an_event_cascades_to_bookings() {
    let app = app();
    let event_id = create_event(&app, None).await;
    let uri = format!("/events/{event_id}/bookings");
    for buyer in ["a", "b", "c"] {
        send(&app, "POST", &uri, Some((buyer, "user")), Some(json!({ "quantity": 1 }))).await;
    }

    let (status, body) = send(&app, "DELETE", &format!("/events/{event_id}"), ORGANIZER, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bookings_removed"], 3);

    let (status, _) = send(&app, "GET", &uri, Some(("root", "admin")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = send(&app, "GET", "/bookings/me", Some(("a", "user")), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn organizer_analytics_reports_sales() {
    let app = app();
    let event_id = create_event(&app, Some(10)).await;
    send(
        &app,
        "POST",
        &format!("/events/{event_id}/bookings"),
        Some(("a", "user")),
        Some(json!({ "quantity": 4 })),
    )
    .await;

    let (status, body) = send(&app, "GET", "/organizer/analytics", ORGANIZER, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_tickets_sold"], 4);
    assert_eq!(body["data"]["total_revenue"], "6000.00");

    let (status, _) = send(&app, "GET", "/organizer/analytics?month=2026-11", ORGANIZER, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/organizer/analytics", Some(("a", "user")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clearing_an_events_bookings_returns_the_tickets() {
    let app = app();
    let event_id = create_event(&app, Some(6)).await;
    let path = format!("/events/{event_id}/bookings");
    for buyer in ["alice", "bob"] {
        send(&app, "POST", &path, Some((buyer, "user")), Some(json!({"quantity": 3}))).await;
    }

    let (status, _) = send(&app, "DELETE", &path, Some(("org-2", "organizer")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, "DELETE", &path, ORGANIZER, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["bookings_removed"], 2);

    let (_, body) = send(
        &app,
        "GET",
        &format!("/events/{event_id}/availability"),
        None,
        None,
    )
    .await;
    assert_eq!(body["data"]["remaining"], json!({"kind": "finite", "tickets": 6}));
}

#[tokio::test]
async fn oversized_orders_are_validation_errors() {
    let app = app();

    let mut pricey = event_body(None, true);
    pricey["price"] = json!("10000000000.00");
    let (status, body) = send(&app, "POST", "/events", ORGANIZER, Some(pricey)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let event_id = create_event(&app, None).await;
    let path = format!("/events/{event_id}/bookings");
    let (status, _) = send(
        &app,
        "POST",
        &path,
        Some(("alice", "user")),
        Some(json!({"quantity": 2_147_483_647u32})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "POST",
        &path,
        Some(("alice", "user")),
        Some(json!({"quantity": u32::MAX})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn uploaded_covers_are_served_back() {
    let app = app();
    let upload = Request::builder()
        .method("POST")
        .uri("/media")
        .header(CALLER_ID_HEADER, "org-1")
        .header(CALLER_ROLE_HEADER, "organizer")
        .header("content-type", "image/png")
        .body(Body::from(vec![0x89, b'P', b'N', b'G']))
        .unwrap();
    let response = app.clone().oneshot(upload).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let url = body["data"]["url"].as_str().unwrap().to_string();
    let blob_id = url.rsplit('/').next().unwrap();

    let download = Request::builder()
        .uri(format!("/media/{blob_id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(download).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], &[0x89, b'P', b'N', b'G']);

    let (status, _) = send(&app, "GET", "/media/unknown", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
