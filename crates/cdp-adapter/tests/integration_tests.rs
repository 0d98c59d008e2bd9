//! Adapter tests against a real Chromium.
//!
//! Run with:
//! ```bash
//! export MEMHARVEST_USE_REAL_CHROME=1
//! export MEMHARVEST_CHROME=/usr/bin/google-chrome
//! cargo test -p cdp-adapter --test integration_tests -- --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{event_bus, CdpAdapter, CdpConfig, RawEvent};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::timeout;

fn should_run_real_tests() -> bool {
    env::var("MEMHARVEST_USE_REAL_CHROME")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn test_config() -> (CdpConfig, TempDir) {
    let profile = tempfile::tempdir().expect("create temporary chrome profile");
    let mut cfg = CdpConfig {
        headless: true,
        user_data_dir: profile.path().into(),
        ..CdpConfig::default()
    };
    if let Ok(chrome_path) = env::var("MEMHARVEST_CHROME") {
        cfg.executable = chrome_path.into();
    }
    (cfg, profile)
}

async fn started() -> (Arc<CdpAdapter>, TempDir) {
    let (cfg, profile) = test_config();
    let (bus, _rx) = event_bus(64);
    let adapter = Arc::new(CdpAdapter::new(cfg, bus));
    Arc::clone(&adapter).start().await.expect("start adapter");
    (adapter, profile)
}

#[tokio::test]
async fn evaluates_in_an_attached_tab() {
    if !should_run_real_tests() {
        println!("Skipping real browser test (MEMHARVEST_USE_REAL_CHROME not set)");
        return;
    }

    let (adapter, _profile) = started().await;
    let page = adapter
        .attach_page(Some("about:blank"))
        .await
        .expect("attach page");

    let value = adapter
        .evaluate(page, "document.title = 'memories'; document.title.length")
        .await
        .expect("evaluate");
    assert_eq!(value, json!(8));

    adapter.shutdown().await;
}

#[tokio::test]
async fn binding_calls_reach_the_bus() {
    if !should_run_real_tests() {
        println!("Skipping real browser test (MEMHARVEST_USE_REAL_CHROME not set)");
        return;
    }

    let (adapter, _profile) = started().await;
    let mut events = adapter.subscribe();
    let page = adapter
        .attach_page(Some("about:blank"))
        .await
        .expect("attach page");
    adapter
        .add_binding(page, "__probe")
        .await
        .expect("add binding");
    adapter
        .evaluate(page, "window.__probe('hello'); true")
        .await
        .expect("call binding");

    let payload = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(RawEvent::BindingCalled { name, payload, .. }) = events.recv().await {
                if name == "__probe" {
                    return payload;
                }
            }
        }
    })
    .await
    .expect("binding event");
    assert_eq!(payload, "hello");

    adapter.shutdown().await;
}
