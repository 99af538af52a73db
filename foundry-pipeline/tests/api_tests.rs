//! HTTP API integration tests
//!
//! Drives the router with `oneshot` requests and checks status codes and
//! the JSON error body for each error class.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use foundry_pipeline::{build_router, AppState};
use helpers::*;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(env: &TestEnv) -> Router {
    build_router(AppState::new(env.engine.clone()))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn waxing_body(flask_no: &str) -> Value {
    json!({
        "production_date": "2025-09-17",
        "flask_no": flask_no,
        "metal_id": 1,
        "gasket_weight": 10.0,
        "tree_weight": 12.0,
        "posted_by": "waxer-1"
    })
}

fn assert_error(body: &Value, code: &str, kind: &str) {
    assert_eq!(body["error"]["code"], code, "body: {}", body);
    assert_eq!(body["error"]["kind"], kind, "body: {}", body);
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_health() {
    let env = setup().await;
    let (status, body) = send(app(&env), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "foundry-pipeline");
    assert!(body["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_waxing_created_then_duplicate_conflict() {
    let env = setup().await;
    add_metal(&env.pool, 1, "14K", 13.25, Some(100.0)).await;

    let (status, body) = send(app(&env), "POST", "/waxing", Some(waxing_body("F-001"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["current_stage"], "supply");
    assert_eq!(body["metal_weight"], 26.5);
    assert_eq!(body["postings"][0]["stage"], "waxing");

    let (status, body) = send(app(&env), "POST", "/waxing", Some(waxing_body("F-001"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_error(&body, "DUPLICATE_FLASK", "validation");
}

#[tokio::test]
async fn test_waxing_unknown_metal_is_bad_request() {
    let env = setup().await;
    let (status, body) = send(app(&env), "POST", "/waxing", Some(waxing_body("F-001"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "UNKNOWN_METAL", "validation");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let env = setup().await;
    add_metal(&env.pool, 1, "14K", 13.25, None).await;

    let request = Request::builder()
        .method("POST")
        .uri("/waxing")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(&env).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // missing posted_by
    let (status, body) = send(
        app(&env),
        "POST",
        "/supply",
        Some(json!({ "flask_id": 1, "scrap_supplied": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    // negative measurement
    let mut negative = waxing_body("F-001");
    negative["gasket_weight"] = json!(-1.0);
    let (status, body) = send(app(&env), "POST", "/waxing", Some(negative)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");
}

#[tokio::test]
async fn test_malformed_path_and_query_are_json_errors() {
    let env = setup().await;

    let (status, body) = send(app(&env), "GET", "/flasks/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (status, body) = send(
        app(&env),
        "POST",
        "/casting/abc",
        Some(json!({ "posted_by": "caster-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (status, body) = send(
        app(&env),
        "POST",
        "/quenching/1.5",
        Some(json!({ "posted_by": "quencher-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (status, body) = send(app(&env), "GET", "/scrap/movements/x", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    // flask_no given twice cannot fill a single field
    let (status, body) = send(app(&env), "GET", "/queue/supply?flask_no=a&flask_no=b", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");
}

#[tokio::test]
async fn test_stage_errors_map_to_statuses() {
    let env = setup().await;
    add_metal(&env.pool, 1, "14K", 13.25, Some(3.0)).await;
    let flask = waxed_flask(&env.engine, "F-001", 1).await;

    // unknown flask
    let (status, body) = send(
        app(&env),
        "POST",
        "/casting/999",
        Some(json!({ "posted_by": "caster-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "FLASK_NOT_FOUND", "validation");

    // wrong stage
    let (status, body) = send(
        app(&env),
        "POST",
        &format!("/casting/{}", flask.id),
        Some(json!({ "posted_by": "caster-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_error(&body, "STAGE_MISMATCH", "ordering");

    // not enough scrap
    let (status, body) = send(
        app(&env),
        "POST",
        "/supply",
        Some(json!({ "flask_id": flask.id, "scrap_supplied": 5.0, "posted_by": "supplier-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_error(&body, "INSUFFICIENT_RESERVE", "resource");
}

#[tokio::test]
async fn test_full_flow_over_http() {
    let env = setup().await;
    add_metal(&env.pool, 1, "14Y", 13.25, Some(100.0)).await;

    let (_, flask) = send(app(&env), "POST", "/waxing", Some(waxing_body("F-001"))).await;
    let id = flask["id"].as_i64().unwrap();

    let (status, _) = send(
        app(&env),
        "POST",
        "/supply",
        Some(json!({ "flask_id": id, "scrap_supplied": 20.0, "posted_by": "supplier-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app(&env),
        "POST",
        &format!("/casting/{}", id),
        Some(json!({ "posted_by": "caster-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["casting_temp"], 1030.0);

    let (status, queue) = send(app(&env), "GET", "/queue/quenching", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue[0]["id"], id);
    assert_eq!(queue[0]["quenching_time_min"], 15);
    assert!(queue[0]["minutes_left"].is_number());

    let (status, _) = send(
        app(&env),
        "POST",
        &format!("/quenching/{}", id),
        Some(json!({ "posted_by": "quencher-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        app(&env),
        "POST",
        "/cutting",
        Some(json!({
            "flask_id": id,
            "before_cut_weight": 100.0,
            "after_scrap_weight": 5.0,
            "after_casting_weight": 92.0,
            "posted_by": "cutter-1"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_stage"], "complete");
    assert_eq!(body["loss"], 3.0);

    let (status, body) = send(app(&env), "GET", &format!("/flasks/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["postings"].as_array().unwrap().len(), 5);

    let (_, reserves) = send(app(&env), "GET", "/scrap/reserves", None).await;
    assert_eq!(reserves[0]["qty_on_hand"], 85.0);
}

#[tokio::test]
async fn test_queue_rejects_unknown_stage_and_filters() {
    let env = setup().await;
    add_metal(&env.pool, 1, "14K", 13.25, None).await;
    waxed_flask(&env.engine, "AB-1", 1).await;
    waxed_flask(&env.engine, "CD-1", 1).await;

    let (status, body) = send(app(&env), "GET", "/queue/polishing", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (status, body) = send(app(&env), "GET", "/queue/supply?flask_no=ab", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["flask_no"], "AB-1");
}

#[tokio::test]
async fn test_metals_and_scrap_administration() {
    let env = setup().await;

    let (status, metal) = send(
        app(&env),
        "POST",
        "/metals",
        Some(json!({ "name": "18Y", "conversion_factor": 16.5, "posted_by": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let metal_id = metal["id"].as_i64().unwrap();

    let (status, body) = send(
        app(&env),
        "POST",
        "/metals",
        Some(json!({ "name": "18Y", "conversion_factor": 16.5, "posted_by": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (_, metals) = send(app(&env), "GET", "/metals", None).await;
    assert_eq!(metals.as_array().unwrap().len(), 1);

    let (status, reserve) = send(
        app(&env),
        "POST",
        "/scrap/adjust",
        Some(json!({ "metal_id": metal_id, "action": "add", "amount": 12.5, "posted_by": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reserve["qty_on_hand"], 12.5);

    let (status, body) = send(
        app(&env),
        "POST",
        "/scrap/adjust",
        Some(json!({ "metal_id": metal_id, "action": "remove", "amount": 20.0, "posted_by": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_error(&body, "INSUFFICIENT_RESERVE", "resource");

    let (status, reserve) = send(
        app(&env),
        "POST",
        "/scrap/adjust",
        Some(json!({ "metal_id": metal_id, "action": "remove", "amount": 2.5, "posted_by": "admin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reserve["qty_on_hand"], 10.0);

    let (status, body) = send(
        app(&env),
        "POST",
        "/scrap/adjust",
        Some(json!({ "metal_id": metal_id, "action": "add", "amount": 1.0, "posted_by": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");

    let (status, movements) = send(
        app(&env),
        "GET",
        &format!("/scrap/movements/{}", metal_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let sources: Vec<&str> = movements
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["source"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["reserve.top_up", "reserve.withdraw"]);
}

#[tokio::test]
async fn test_scrap_adjust_unknown_metal() {
    let env = setup().await;
    let (status, body) = send(
        app(&env),
        "POST",
        "/scrap/adjust",
        Some(json!({ "metal_id": 77, "action": "add", "amount": 1.0, "posted_by": "admin" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "UNKNOWN_METAL", "validation");
}

#[tokio::test]
async fn test_events_endpoint_is_event_stream() {
    let env = setup().await;
    let request = Request::builder().uri("/events").body(Body::empty()).unwrap();
    let response = app(&env).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(env.hub.subscriber_count(), 1);

    drop(response);
    assert_eq!(env.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_tree_intake_and_transit_report() {
    let env = setup().await;
    add_metal(&env.pool, 1, "18R", 16.5, None).await;

    let tree = |tree_no: &str, metal_id: i64| {
        json!({
            "production_date": "2025-09-17",
            "tree_no": tree_no,
            "metal_id": metal_id,
            "tree_weight": 12.0,
            "posted_by": "waxer-1"
        })
    };

    let (status, body) = send(app(&env), "POST", "/trees", Some(tree("T-1", 1))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "transit");
    assert_eq!(body["metal_name"], "18R");
    assert_eq!(body["est_metal_weight"], 198.0);

    let (status, body) = send(app(&env), "POST", "/trees", Some(tree("T-1", 1))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_error(&body, "DUPLICATE_TREE", "validation");

    let (status, body) = send(app(&env), "POST", "/trees", Some(tree("T-2", 7))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "UNKNOWN_METAL", "validation");

    let (status, body) = send(
        app(&env),
        "GET",
        "/reports/transit?date_from=2025-09-01&date_to=2025-09-30&metal=All",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filters"]["metal"], "All");
    assert_eq!(body["filters"]["date_from"], "2025-09-01");
    assert_eq!(body["rows"][0]["metal_name"], "18R");
    assert_eq!(body["rows"][0]["count"], 1);
    assert_eq!(body["overall_total"], 198.0);

    let (status, body) = send(app(&env), "GET", "/reports/transit?date_from=yesterday", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_MEASUREMENT", "validation");
}
