use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use spyglass_backend::{build_state, config::Config, create_app, helpers};
use tower::ServiceExt;
// for `oneshot` method

/// Helper to create test database with in-memory SQLite
async fn setup_test_db() -> spyglass_db::Database {
    spyglass_db::Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database")
}

/// Helper to create app with default test configuration
fn create_test_app(db: spyglass_db::Database) -> axum::Router {
    create_app(build_state(db, Config::default()))
}

/// Helper to send a request and get response
async fn send_request(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(uri)
        .method(method)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();

    let body = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, body)
}

/// Seed one completed session and return its id
async fn seed_closed_session(
    db: &spyglass_db::Database,
    name: &str,
    start: i64,
    duration: i64,
) -> i64 {
    let id = db
        .create_open_session(name.to_string(), start)
        .await
        .unwrap();
    db.close_session(id, start + duration).await.unwrap();
    id
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, _body) = send_request(app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoint_with_post_method() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, _body) = send_request(app, "POST", "/health").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_returns_not_found() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, _body) = send_request(app, "GET", "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// SESSION LISTING TESTS
// =============================================================================

#[tokio::test]
async fn test_list_sessions_empty() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, body) = send_request(app, "GET", "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], json!([]));
    assert_eq!(body["pagination"]["total"], 0);
    assert_eq!(body["pagination"]["page"], 1);
}

#[tokio::test]
async fn test_list_sessions_shape_and_ordering() {
    let db = setup_test_db().await;
    let now = helpers::now();

    seed_closed_session(&db, "Steve", now - 10_000, 600).await;
    db.create_open_session("Alex".to_string(), now - 300)
        .await
        .unwrap();

    let app = create_test_app(db);
    let (status, body) = send_request(app, "GET", "/api/sessions").await;
    assert_eq!(status, StatusCode::OK);

    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);

    // Active sessions sort first; open sessions carry no duration
    assert_eq!(sessions[0]["playerName"], "Alex");
    assert_eq!(sessions[0]["isActive"], true);
    assert_eq!(sessions[0]["sessionEnd"], Value::Null);
    assert_eq!(sessions[0]["duration"], Value::Null);

    assert_eq!(sessions[1]["playerName"], "Steve");
    assert_eq!(sessions[1]["isActive"], false);
    assert_eq!(sessions[1]["duration"], 600);
    assert_eq!(sessions[1]["sessionStart"], now - 10_000);
}

#[tokio::test]
async fn test_list_sessions_filters() {
    let db = setup_test_db().await;
    let now = helpers::now();

    seed_closed_session(&db, "Steve", now - 5000, 600).await;
    seed_closed_session(&db, "Alex", now - 4000, 600).await;
    db.create_open_session("Alex".to_string(), now - 100)
        .await
        .unwrap();

    let app = create_test_app(db);

    let (status, body) = send_request(app.clone(), "GET", "/api/sessions?playerName=lex").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 2);

    let (status, body) = send_request(app, "GET", "/api/sessions?activeOnly=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["sessions"][0]["playerName"], "Alex");
}

#[tokio::test]
async fn test_list_sessions_clamps_page_size() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, body) = send_request(app, "GET", "/api/sessions?limit=100000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["limit"], 200);
}

#[tokio::test]
async fn test_list_sessions_pagination_flags() {
    let db = setup_test_db().await;
    let now = helpers::now();
    for i in 0..5 {
        seed_closed_session(&db, "Steve", now - 10_000 + i * 1000, 600).await;
    }

    let app = create_test_app(db);
    let (status, body) = send_request(app.clone(), "GET", "/api/sessions?limit=2&page=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 5);
    assert_eq!(body["pagination"]["totalPages"], 3);
    assert_eq!(body["pagination"]["hasMore"], true);

    let (_status, body) = send_request(app, "GET", "/api/sessions?limit=2&page=3").await;
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["hasMore"], false);
}

// =============================================================================
// PLAYER HISTORY TESTS
// =============================================================================

#[tokio::test]
async fn test_player_history() {
    let db = setup_test_db().await;
    let now = helpers::now();
    seed_closed_session(&db, "Steve", now - 5000, 600).await;
    seed_closed_session(&db, "Alex", now - 4000, 600).await;

    let app = create_test_app(db);
    let (status, body) = send_request(app, "GET", "/api/sessions/player/Steve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["playerName"], "Steve");
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 1);
}

#[tokio::test]
async fn test_player_history_rejects_invalid_name() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    // 17 characters: over the Minecraft username limit
    let (status, body) =
        send_request(app, "GET", "/api/sessions/player/12345678901234567").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.get("error").is_some());
}

// =============================================================================
// ACTIVE SESSIONS TESTS
// =============================================================================

#[tokio::test]
async fn test_active_sessions_live_duration() {
    let db = setup_test_db().await;
    let now = helpers::now();
    db.create_open_session("Steve".to_string(), now - 100)
        .await
        .unwrap();
    seed_closed_session(&db, "Alex", now - 5000, 600).await;

    let app = create_test_app(db);
    let (status, body) = send_request(app, "GET", "/api/sessions/active").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let session = &body["activeSessions"][0];
    assert_eq!(session["playerName"], "Steve");
    assert!(session["duration"].as_i64().unwrap() >= 100);
}

// =============================================================================
// SESSION STATS TESTS
// =============================================================================

#[tokio::test]
async fn test_session_stats() {
    let db = setup_test_db().await;
    let now = helpers::now();
    seed_closed_session(&db, "Steve", now - 5000, 600).await;
    seed_closed_session(&db, "Steve", now - 3000, 400).await;
    seed_closed_session(&db, "Alex", now - 2000, 200).await;

    let app = create_test_app(db);
    let (status, body) = send_request(app.clone(), "GET", "/api/sessions/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"], "30 days");
    assert_eq!(body["playerName"], "all players");
    assert_eq!(body["stats"]["totalSessions"], 3);
    assert_eq!(body["stats"]["totalPlaytime"], 1200);
    assert_eq!(body["stats"]["averageSessionLength"], 400);
    assert_eq!(body["stats"]["uniquePlayers"], 2);

    let (status, body) =
        send_request(app, "GET", "/api/sessions/stats?playerName=Alex&days=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period"], "7 days");
    assert_eq!(body["playerName"], "Alex");
    assert_eq!(body["stats"]["totalSessions"], 1);
}

// =============================================================================
// OBSERVABILITY ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_cache_stats_cold() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, body) = send_request(app, "GET", "/api/cache/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hasData"], false);
    assert_eq!(body["isExpired"], true);
    assert_eq!(body["ttlSecs"], 60);
    assert_eq!(body["ageSecs"], Value::Null);
}

#[tokio::test]
async fn test_performance_endpoint_empty() {
    let db = setup_test_db().await;
    let app = create_test_app(db);

    let (status, body) = send_request(app, "GET", "/api/performance").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], Value::Null);
    assert_eq!(body["history"], json!([]));
}
