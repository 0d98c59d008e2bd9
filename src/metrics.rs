use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use cdp_adapter::metrics as cdp_metrics;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static HARVEST_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("memharvest_runs_total", "Harvest runs by outcome"),
        &["outcome"],
    )
    .expect("valid metric")
});

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        cdp_metrics::register_metrics(registry);
        if let Err(err) = registry.register(Box::new(HARVEST_RUNS.clone())) {
            error!(?err, "failed to register harvest metrics");
        }
    });
}

/// Count a finished run; `outcome` is `completed`, `busy` or an error kind.
pub fn record_run(outcome: &str) {
    HARVEST_RUNS.with_label_values(&[outcome]).inc();
}

/// Prometheus text exposition of the global registry.
pub fn render() -> Response {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
    }

    match (
        String::from_utf8(buffer),
        HeaderValue::from_str(encoder.format_type()),
    ) {
        (Ok(body), Ok(content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        _ => {
            error!("failed to build metrics response");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}
