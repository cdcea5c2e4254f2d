// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Control Plane API Tests
 * Envelope shape, status codes and endpoint behavior
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use ansa_detector::api::{self, AppState};
use ansa_detector::config::AppConfig;
use ansa_detector::store::Store;

async fn test_app() -> Router {
    let config = AppConfig {
        database_url: "sqlite::memory:".to_string(),
        ..AppConfig::default()
    };
    let store = Store::connect(&config.database_url, config.max_body_bytes)
        .await
        .unwrap();
    store.init_schema().await.unwrap();
    let state = AppState::new(config, store).await.unwrap();
    api::router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_flow(app: &Router, name: &str) -> i64 {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/flows",
        Some(json!({ "name": name, "targetDomain": "shop.example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["flowId"].as_i64().unwrap()
}

#[tokio::test]
async fn test_create_flow_envelope_shape() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/flows",
        Some(json!({ "name": "checkout" })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["name"], json!("checkout"));
    assert!(body["requestId"].is_string());
    assert!(body["timestamp"].is_string());
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_missing_flow_is_not_found() {
    let app = test_app().await;
    let (status, body) = send(&app, Method::GET, "/api/flows/9999", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["code"], json!("not_found"));
    assert!(body["error"].as_str().unwrap().contains("9999"));
}

#[tokio::test]
async fn test_blank_flow_name_is_unprocessable() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/flows",
        Some(json!({ "name": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], json!("validation"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = test_app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/flows")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_flow_list_pagination_envelope() {
    let app = test_app().await;
    for name in ["a", "b", "c"] {
        create_flow(&app, name).await;
    }

    let (status, body) = send(&app, Method::GET, "/api/flows?page=1&perPage=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["items"].as_array().unwrap().len(), 2);
    assert_eq!(data["total"], json!(3));
    assert_eq!(data["hasNext"], json!(true));
    assert_eq!(data["hasPrev"], json!(false));

    let (_, second) = send(&app, Method::GET, "/api/flows?page=2&perPage=2", None).await;
    assert_eq!(second["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(second["data"]["hasNext"], json!(false));
    assert_eq!(second["data"]["hasPrev"], json!(true));
}

#[tokio::test]
async fn test_recording_session_lifecycle_and_conflicts() {
    let app = test_app().await;
    let flow_id = create_flow(&app, "recording").await;

    // No session yet: adding a request conflicts
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/recording/request",
        Some(json!({
            "method": "GET",
            "url": "https://shop.example.com/",
            "capturedStatus": 200
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("conflict"));

    // Select the flow, then start without an explicit flowId
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/flows/{}/select", flow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, Method::POST, "/api/recording/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["flowId"], json!(flow_id));

    // A second session cannot start while one is active
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/recording/start",
        Some(json!({ "flowId": flow_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("conflict"));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/recording/request",
        Some(json!({
            "method": "POST",
            "url": "https://shop.example.com/cart/add",
            "headers": { "Content-Type": "application/json" },
            "capturedStatus": 200
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["ordinal"], json!(1));

    let (status, body) = send(&app, Method::POST, "/api/recording/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["requestsRecorded"], json!(1));

    let (_, body) = send(&app, Method::GET, "/api/recording/status", None).await;
    assert_eq!(body["data"]["recording"], json!(false));
}

#[tokio::test]
async fn test_threshold_round_trip_and_validation() {
    let app = test_app().await;

    let (_, body) = send(&app, Method::GET, "/api/analysis/threshold", None).await;
    assert_eq!(body["data"]["threshold"], json!(0.7));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/analysis/threshold",
        Some(json!({ "threshold": 0.85 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, "/api/analysis/threshold", None).await;
    assert_eq!(body["data"]["threshold"], json!(0.85));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/analysis/threshold",
        Some(json!({ "threshold": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], json!("validation"));
}

#[tokio::test]
async fn test_mutation_catalog_round_trip() {
    let app = test_app().await;

    let (status, body) = send(&app, Method::GET, "/api/payloads/rules", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], json!("2026.1"));
    assert!(!body["data"]["rules"].as_array().unwrap().is_empty());

    // An empty catalog is rejected
    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/payloads/rules",
        Some(json!({ "version": "custom", "rules": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], json!("validation"));

    // A valid replacement is served back
    let replacement = json!({
        "version": "custom-1",
        "rules": [{
            "id": "only-strip-auth",
            "category": "auth",
            "description": "Remove the Authorization header",
            "selector": { "kind": "header", "name": "Authorization" },
            "transform": { "kind": "delete" },
            "applies": { "requiresAuth": true }
        }]
    });
    let (status, _) = send(&app, Method::PUT, "/api/payloads/rules", Some(replacement)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, "/api/payloads/rules", None).await;
    assert_eq!(body["data"]["version"], json!("custom-1"));
}

#[tokio::test]
async fn test_detection_rules_exposed_and_replaceable() {
    let app = test_app().await;

    let (status, body) = send(&app, Method::GET, "/api/analysis/rules", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], json!("2026.1"));
    let detectors = body["data"]["detectors"].as_array().unwrap().clone();
    assert!(detectors.len() >= 6);

    // Tighten one detector's confidence and push the catalog back
    let replacement = json!({
        "version": "tuned-1",
        "detectors": [{ "kind": "status_transition", "confidence": 0.95 }]
    });
    let (status, _) = send(&app, Method::PUT, "/api/analysis/rules", Some(replacement)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, "/api/analysis/rules", None).await;
    assert_eq!(body["data"]["version"], json!("tuned-1"));
}

#[tokio::test]
async fn test_empty_flow_report_is_well_formed() {
    let app = test_app().await;
    let flow_id = create_flow(&app, "empty-report").await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/reports/summary/{}", flow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["statistics"]["totalRequests"], json!(0));
    assert!(data["requests"].as_array().unwrap().is_empty());
    assert!(data["anomalies"].as_array().unwrap().is_empty());
    assert_eq!(data["risk"]["riskScore"], json!(0.0));

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/reports/executive/{}", flow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["riskCategory"], json!("LOW"));
}

#[tokio::test]
async fn test_json_report_served_as_attachment() {
    let app = test_app().await;
    let flow_id = create_flow(&app, "attachment").await;

    let request = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/reports/json/{}", flow_id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("attachment"));

    // The attachment is the raw report contract, not the API envelope
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["reportVersion"], json!("1"));
    assert!(report.get("success").is_none());
}

#[tokio::test]
async fn test_payload_generation_via_api() {
    let app = test_app().await;
    let flow_id = create_flow(&app, "generation").await;

    send(
        &app,
        Method::POST,
        &format!("/api/flows/{}/select", flow_id),
        None,
    )
    .await;
    send(&app, Method::POST, "/api/recording/start", None).await;
    for step in ["start", "confirm"] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/recording/request",
            Some(json!({
                "method": "POST",
                "url": format!("https://shop.example.com/checkout/{}?qty=1", step),
                "headers": { "Content-Type": "application/json" },
                "body": "eyJwcmljZSI6MTkuOTksInF0eSI6MX0=",
                "capturedStatus": 200
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    send(&app, Method::POST, "/api/recording/stop", None).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/payloads/generate/flow/{}", flow_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["generated"].as_u64().unwrap() > 0);

    let (_, listing) = send(
        &app,
        Method::GET,
        &format!("/api/flows/{}/testcases", flow_id),
        None,
    )
    .await;
    assert!(listing["data"]["total"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_identity_pool_round_trip() {
    let app = test_app().await;
    let flow_id = create_flow(&app, "identities").await;

    let pool = json!([{
        "name": "admin-candidate",
        "headers": { "Authorization": "Bearer admin-token" },
        "cookies": {}
    }]);
    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/flows/{}/identities", flow_id),
        Some(pool),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], json!("admin-candidate"));

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/flows/{}/identities", flow_id),
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_execution_status_is_not_found() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        Method::GET,
        "/api/replay/status/exec-unknown",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("not_found"));
}

#[tokio::test]
async fn test_system_status_reports_runtime_state() {
    let app = test_app().await;
    create_flow(&app, "status").await;

    let (status, body) = send(&app, Method::GET, "/api/system/status", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert!(data["version"].is_string());
    assert_eq!(data["flows"], json!(1));
    assert_eq!(data["recording"], json!(false));

    let (status, body) = send(&app, Method::GET, "/api/system/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["maxConcurrentRequests"], json!(5));
    assert_eq!(body["data"]["confidenceThreshold"], json!(0.7));
    // The database DSN is not exposed
    assert!(body["data"].get("databaseUrl").is_none());
}
