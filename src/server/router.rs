use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use harvest_core::protocol;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument};

use super::state::ServeState;
use crate::metrics;

pub fn build_router(state: ServeState) -> Router {
    Router::new()
        .route("/message", post(message_handler))
        .route("/health", get(health_handler))
        .route("/livez", get(live_handler))
        .route("/metrics", get(|| async { metrics::render() }))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[instrument(name = "memharvest.message", skip_all, fields(action = tracing::field::Empty))]
async fn message_handler(State(state): State<ServeState>, Json(message): Json<Value>) -> Json<Value> {
    let action = message
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    tracing::Span::current().record("action", action.as_str());

    let response = protocol::handle_value(&state.harvester, message).await;
    let error = response
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string);
    info!(success = error.is_none(), "message handled");
    state.health.record(error);
    Json(response)
}

async fn health_handler(State(state): State<ServeState>) -> Json<Value> {
    let snapshot = state.health.snapshot();
    Json(json!({
        "status": "ok",
        "live": snapshot.live,
        "running": state.harvester.is_running(),
        "watching": state.harvester.is_watching(),
        "has_report": state.harvester.last_report().is_some(),
        "last_request_ts": snapshot.last_request,
        "last_error": snapshot.last_error,
        "cdp": cdp_adapter::metrics::snapshot(),
    }))
}

async fn live_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let live = state.health.snapshot().live;
    let status = if live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "live": live })))
}
