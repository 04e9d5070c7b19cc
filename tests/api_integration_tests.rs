//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use segcache::{api::create_router, AppState, Config};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

async fn create_test_app() -> Router {
    let state = AppState::from_config(&Config::default()).await.unwrap();
    create_router(state)
}

fn put_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/set")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app().await;

    let response = app
        .oneshot(put_json(r#"{"id":"test_id","value":{"v":1}}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["id"], "test_id");
}

#[tokio::test]
async fn test_set_endpoint_with_ttl() {
    let app = create_test_app().await;

    let response = app
        .oneshot(put_json(r#"{"id":"ttl_id","value":"ttl_value","ttl":60000}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_set_endpoint_ttl_above_maximum() {
    let app = create_test_app().await;

    let response = app
        .oneshot(put_json(r#"{"id":"big","value":1,"ttl":2147483648}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_success() {
    let app = create_test_app().await;

    let set_response = app
        .clone()
        .oneshot(put_json(r#"{"id":"get_id","value":{"name":"widget"}}"#))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    let get_response = app.oneshot(get("/get/get_id")).await.unwrap();

    assert_eq!(get_response.status(), StatusCode::OK);
    let json = body_to_json(get_response.into_body()).await;
    assert_eq!(json["id"], "get_id");
    assert_eq!(json["value"], json!({"name": "widget"}));
    assert_eq!(json["ttl"], 300_000);
    assert_eq!(json["is_stale"], false);
    assert!(json["stored"].as_u64().is_some());
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app().await;

    let response = app.oneshot(get("/get/nonexistent_id")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint_success() {
    let app = create_test_app().await;

    let set_response = app
        .clone()
        .oneshot(put_json(r#"{"id":"delete_id","value":"delete_value"}"#))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    let del_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/del/delete_id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(del_response.status(), StatusCode::OK);

    // Verify it's gone
    let get_response = app.oneshot(get("/get/delete_id")).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_endpoint_unknown_id() {
    let app = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/del/nonexistent_id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Dropping an absent id is not an error
    assert_eq!(response.status(), StatusCode::OK);
}

// == STATS Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app().await;

    let _ = app
        .clone()
        .oneshot(put_json(r#"{"id":"stats_id","value":"stats_value"}"#))
        .await
        .unwrap();

    // Get (hit)
    let _ = app.clone().oneshot(get("/get/stats_id")).await.unwrap();

    // Get (miss)
    let _ = app.clone().oneshot(get("/get/nonexistent")).await.unwrap();

    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;

    assert_eq!(json["sets"].as_u64().unwrap(), 1);
    assert_eq!(json["gets"].as_u64().unwrap(), 2);
    assert_eq!(json["hits"].as_u64().unwrap(), 1);
    assert_eq!(json["entries"].as_u64().unwrap(), 1);
    assert!(json["byte_size"].as_u64().unwrap() > 144);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"].as_str().unwrap(), "healthy");
    assert_eq!(json["ready"], true);
    assert!(json.get("timestamp").is_some());
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let app = create_test_app().await;

    let response = app.oneshot(put_json(r#"{"invalid json"#)).await.unwrap();

    // Axum returns 422 for JSON parsing errors by default
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_id_request() {
    let app = create_test_app().await;

    let response = app
        .oneshot(put_json(r#"{"id":"","value":"test"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

#[tokio::test]
async fn test_budget_exhausted_request() {
    let config = Config {
        max_byte_size: 200,
        ..Config::default()
    };
    let app = create_router(AppState::from_config(&config).await.unwrap());

    let response = app
        .oneshot(put_json(
            r#"{"id":"large","value":"this payload does not fit in the remaining budget"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INSUFFICIENT_STORAGE);
}

// == TTL Expiration via API Tests ==

#[tokio::test(start_paused = true)]
async fn test_ttl_expiration_via_api() {
    let app = create_test_app().await;

    let set_response = app
        .clone()
        .oneshot(put_json(r#"{"id":"ttl_test","value":"expires_soon","ttl":1000}"#))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    // Verify it exists immediately
    let get_response = app.clone().oneshot(get("/get/ttl_test")).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);

    // Wait for TTL to expire
    tokio::time::sleep(Duration::from_millis(1001)).await;

    let get_response = app.clone().oneshot(get("/get/ttl_test")).await.unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);

    let stats = body_to_json(app.oneshot(get("/stats")).await.unwrap().into_body()).await;
    assert_eq!(stats["byte_size"], 0);
    assert_eq!(stats["entries"], 0);
}
