use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use serde::Serialize;
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub events: u64,
    pub bindings: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static BINDINGS: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("memharvest_cdp_commands_total", "Total CDP commands sent"),
        &["method"]
    )
    .expect("valid metric");
    static ref CDP_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "memharvest_cdp_command_failures_total",
            "Total CDP command failures"
        ),
        &["method"]
    )
    .expect("valid metric");
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "memharvest_cdp_command_duration_seconds",
            "CDP command latency",
            vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
        ),
        &["method"]
    )
    .expect("valid metric");
    static ref CDP_EVENTS_TOTAL: IntCounter =
        IntCounter::new("memharvest_cdp_events_total", "Total CDP events received")
            .expect("valid metric");
    static ref CDP_BINDING_CALLS_TOTAL: IntCounter = IntCounter::new(
        "memharvest_cdp_binding_calls_total",
        "Total page binding calls (mutation ticks)",
    )
    .expect("valid metric");
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_FAILURES_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
    register(registry, CDP_BINDING_CALLS_TOTAL.clone());
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    CDP_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    CDP_EVENTS_TOTAL.inc();
}

pub fn record_binding_call() {
    BINDINGS.fetch_add(1, Ordering::Relaxed);
    CDP_BINDING_CALLS_TOTAL.inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    CDP_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    CDP_COMMAND_FAILURES_TOTAL.with_label_values(&[method]).inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        bindings: BINDINGS.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(metrics)]
    fn records_success_and_failure_metrics() {
        let before = snapshot();
        record_command("Runtime.evaluate");
        record_command_success("Runtime.evaluate", Duration::from_micros(150));
        record_command_failure("Runtime.evaluate");
        record_binding_call();
        let after = snapshot();
        assert!(after.commands >= before.commands + 1);
        assert!(after.command_success >= before.command_success + 1);
        assert!(after.command_failures >= before.command_failures + 1);
        assert!(after.bindings >= before.bindings + 1);
        assert!(after.command_latency_total_us >= before.command_latency_total_us + 150);
    }

    #[test]
    #[serial(metrics)]
    fn registers_into_custom_registry() {
        let registry = Registry::new();
        register_metrics(&registry);
        record_command("Page.enable");
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"memharvest_cdp_commands_total".to_string()));
    }
}
