use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Datelike, Duration, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::DayOfWeek;
use scheduling_cell::router::scheduling_routes;
use shared_config::AppConfig;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

fn create_test_app(config: AppConfig) -> Router {
    scheduling_routes(Arc::new(config))
}

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = TestConfig::default().to_app_config();
    config.supabase_url = server.uri();
    config
}

fn bearer(user: &TestUser, config: &AppConfig) -> String {
    format!(
        "Bearer {}",
        JwtTestUtils::create_test_token(user, &config.supabase_jwt_secret, Some(24))
    )
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn all_routes_require_authentication() {
    let config = TestConfig::default().to_app_config();
    let app = create_test_app(config);
    let id = Uuid::new_v4();

    let endpoints = vec![
        ("POST", "/slots".to_string()),
        ("DELETE", format!("/slots/{}", id)),
        ("GET", format!("/slots/{}/available?date=2025-06-02", id)),
        ("GET", format!("/slots/clinic/{}", id)),
        ("POST", "/bookings".to_string()),
        ("GET", "/bookings/my".to_string()),
        ("GET", format!("/bookings/{}", id)),
        ("POST", format!("/bookings/{}/cancel", id)),
        ("POST", format!("/bookings/{}/reschedule", id)),
        ("GET", format!("/clinic/{}", id)),
        ("GET", "/stats/clinic".to_string()),
        ("GET", "/stats/admin".to_string()),
    ];

    for (http_method, uri) in endpoints {
        let request = Request::builder()
            .method(http_method)
            .uri(&uri)
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::UNAUTHORIZED,
            "{} {} should require auth",
            http_method,
            uri
        );
    }
}

#[tokio::test]
async fn bad_tokens_are_rejected() {
    let config = TestConfig::default().to_app_config();
    let user = TestUser::owner("owner@example.com");

    let tokens = vec![
        JwtTestUtils::create_expired_token(&user, &config.supabase_jwt_secret),
        JwtTestUtils::create_invalid_signature_token(&user),
        JwtTestUtils::create_malformed_token(),
    ];

    for token in tokens {
        let app = create_test_app(TestConfig::default().to_app_config());
        let request = Request::builder()
            .method("GET")
            .uri("/bookings/my")
            .header("Authorization", format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn admin_stats_are_gated_by_role() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let owner = TestUser::owner("owner@example.com");

    let request = Request::builder()
        .method("GET")
        .uri("/stats/admin")
        .header("Authorization", bearer(&owner, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn clinic_stats_are_gated_by_role() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let owner = TestUser::owner("owner@example.com");

    let request = Request::builder()
        .method("GET")
        .uri("/stats/clinic")
        .header("Authorization", bearer(&owner, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_read_system_stats() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let admin = TestUser::admin("admin@example.com");

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "u1",
                "2025-06-02T10:00:00Z",
                "2025-06-02T10:30:00Z",
                "CONFIRMED",
            )
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri("/stats/admin")
        .header("Authorization", bearer(&admin, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["total_bookings"], 1);
    assert_eq!(body["stats"]["confirmed"], 1);
}

#[tokio::test]
async fn booking_can_be_created_through_the_api() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");
    let clinic_id = Uuid::new_v4();
    let booking_id = Uuid::new_v4();

    // Two days out at 10:00 UTC keeps the request clear of the lead-time
    // window regardless of when the test runs.
    let date = (Utc::now() + Duration::days(2)).date_naive();
    let start = date.and_hms_opt(10, 0, 0).unwrap().and_utc();
    let end = date.and_hms_opt(10, 30, 0).unwrap().and_utc();
    let day = DayOfWeek::from_weekday(date.weekday());

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .and(query_param("id", format!("eq.{}", clinic_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::clinic_row(clinic_id, "clinic-staff", true)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("day_of_week", format!("eq.{}", day.as_str())))
        .and(query_param("start_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_row(
                Uuid::new_v4(),
                clinic_id,
                day.as_str(),
                "10:00:00",
                "10:30:00",
                1,
            )
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("status", "in.(CONFIRMED,RESCHEDULED)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/bookings"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                booking_id,
                clinic_id,
                &user.id,
                &start.to_rfc3339(),
                &end.to_rfc3339(),
                "CONFIRMED",
            )
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    let payload = json!({
        "clinic_id": clinic_id,
        "start_time": start.to_rfc3339(),
        "end_time": end.to_rfc3339()
    });

    let request = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header("Authorization", bearer(&user, &config))
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["booking"]["id"], json!(booking_id));
    assert_eq!(body["booking"]["status"], "CONFIRMED");
}

#[tokio::test]
async fn booking_requests_need_offset_aware_timestamps() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");

    let payload = json!({
        "clinic_id": Uuid::new_v4(),
        "start_time": "2025-06-02T10:00:00",
        "end_time": "2025-06-02T10:30:00"
    });

    let request = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header("Authorization", bearer(&user, &config))
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn availability_is_reported_per_slot() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");
    let clinic_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("day_of_week", "eq.MONDAY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_row(
                Uuid::new_v4(), clinic_id, "MONDAY", "09:00:00", "09:30:00", 1,
            ),
            MockSupabaseResponses::time_slot_row(
                Uuid::new_v4(), clinic_id, "MONDAY", "10:00:00", "10:30:00", 2,
            ),
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("status", "in.(CONFIRMED,RESCHEDULED)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                clinic_id,
                "someone",
                "2025-06-02T09:00:00Z",
                "2025-06-02T09:30:00Z",
                "CONFIRMED",
            )
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/slots/{}/available?date=2025-06-02", clinic_id))
        .header("Authorization", bearer(&user, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["date"], "2025-06-02");

    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0]["is_booked"], true);
    assert_eq!(slots[0]["start_time"], "09:00");
    assert_eq!(slots[1]["is_booked"], false);
}

#[tokio::test]
async fn users_can_list_their_own_bookings() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");
    let clinic_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("user_id", format!("eq.{}", user.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                clinic_id,
                &user.id,
                "2025-06-02T10:00:00Z",
                "2025-06-02T10:30:00Z",
                "CONFIRMED",
            ),
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                clinic_id,
                &user.id,
                "2025-05-01T10:00:00Z",
                "2025-05-01T10:30:00Z",
                "CANCELLED",
            ),
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri("/bookings/my")
        .header("Authorization", bearer(&user, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["bookings"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn booking_listings_accept_filters() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");
    let clinic_id = Uuid::new_v4();

    // The status filter must reach the store query.
    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("user_id", format!("eq.{}", user.id)))
        .and(query_param("status", "eq.CANCELLED"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                clinic_id,
                &user.id,
                "2025-05-01T10:00:00Z",
                "2025-05-01T10:30:00Z",
                "CANCELLED",
            )
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri("/bookings/my?status=CANCELLED&limit=10")
        .header("Authorization", bearer(&user, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let bookings = body["bookings"].as_array().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["status"], "CANCELLED");
}

#[tokio::test]
async fn clinic_booking_list_is_restricted_to_its_staff() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let staff = TestUser::clinic("vet@example.com");
    let clinic_id = Uuid::new_v4();

    // Clinic is owned by a different staff user.
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .and(query_param("id", format!("eq.{}", clinic_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::clinic_row(clinic_id, "a-different-staff-user", true)
        ])))
        .mount(&server)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/clinic/{}", clinic_id))
        .header("Authorization", bearer(&staff, &config))
        .body(Body::empty())
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn conflicting_booking_returns_conflict_status() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    let user = TestUser::owner("owner@example.com");
    let clinic_id = Uuid::new_v4();

    let date = (Utc::now() + Duration::days(2)).date_naive();
    let start = date.and_hms_opt(10, 0, 0).unwrap().and_utc();
    let end = date.and_hms_opt(10, 30, 0).unwrap().and_utc();
    let day = DayOfWeek::from_weekday(date.weekday());

    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::clinic_row(clinic_id, "clinic-staff", true)
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/time_slots"))
        .and(query_param("start_time", "eq.10:00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::time_slot_row(
                Uuid::new_v4(),
                clinic_id,
                day.as_str(),
                "10:00:00",
                "10:30:00",
                1,
            )
        ])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/scheduling_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/bookings"))
        .and(query_param("status", "in.(CONFIRMED,RESCHEDULED)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::booking_row(
                Uuid::new_v4(),
                clinic_id,
                "someone-else",
                &start.to_rfc3339(),
                &end.to_rfc3339(),
                "CONFIRMED",
            )
        ])))
        .mount(&server)
        .await;

    let payload = json!({
        "clinic_id": clinic_id,
        "start_time": start.to_rfc3339(),
        "end_time": end.to_rfc3339()
    });

    let request = Request::builder()
        .method("POST")
        .uri("/bookings")
        .header("Authorization", bearer(&user, &config))
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let response = create_test_app(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Slot is already booked");
}
