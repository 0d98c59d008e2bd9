use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use harvest_core::host::demo::{DemoOptions, DemoPage};
use harvest_core::{HarvestConfig, MemoryHarvester};
use memory_harvester::{build_router, ServeState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn demo_router(records: usize) -> Router {
    let page = DemoPage::build(DemoOptions::with_records(records));
    let harvester = MemoryHarvester::new(Arc::new(page.host.clone()), HarvestConfig::default());
    let state = ServeState::new(Arc::new(harvester));
    state.health().mark_live();
    build_router(state)
}

async fn post_message(router: &Router, message: Value) -> Value {
    let response = router
        .clone()
        .oneshot(
            Request::post("/message")
                .header("content-type", "application/json")
                .body(Body::from(message.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(start_paused = true)]
async fn ping_answers_ready() {
    let router = demo_router(3);
    let reply = post_message(&router, json!({ "action": "ping" })).await;
    assert_eq!(reply, json!({ "success": true, "status": "ready" }));
}

#[tokio::test(start_paused = true)]
async fn export_then_status_share_the_report() {
    let router = demo_router(18);

    let export = post_message(&router, json!({ "action": "exportMemories" })).await;
    assert_eq!(export["success"], true);
    assert_eq!(export["data"].as_array().map(Vec::len), Some(18));

    let status = post_message(&router, json!({ "action": "getMemoryStatus" })).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["isFull"], true);
    assert_eq!(status["markdown"], export["markdown"]);

    let (code, health) = get_json(&router, "/health").await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(health["has_report"], true);
    assert_eq!(health["running"], false);
    assert!(health["last_error"].is_null());
}

#[tokio::test(start_paused = true)]
async fn unknown_actions_are_recorded_as_errors() {
    let router = demo_router(3);
    let reply = post_message(&router, json!({ "action": "explode" })).await;
    assert_eq!(reply["success"], false);

    let (_, health) = get_json(&router, "/health").await;
    assert_eq!(health["last_error"], reply["error"]);
    assert!(health["last_request_ts"].is_u64());
}

#[tokio::test]
async fn livez_reflects_mark_live() {
    let page = DemoPage::build(DemoOptions::with_records(1));
    let harvester = MemoryHarvester::new(Arc::new(page.host.clone()), HarvestConfig::default());
    let router = build_router(ServeState::new(Arc::new(harvester)));

    let (code, body) = get_json(&router, "/livez").await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({ "live": false }));
}
