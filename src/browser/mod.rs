//! [`HostPage`] over a live Chromium tab.
//!
//! Reads and actions are small scripts evaluated in the page. Element ids
//! are assigned on the page side and held in a `WeakMap`, so an id stays the
//! same across snapshots for as long as its element is attached. Mutation
//! ticks come from one `MutationObserver` that calls a CDP binding.

use std::sync::Arc;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, CdpAdapter, PageId, RawEvent};
use harvest_core::dom::DomSnapshot;
use harvest_core::{HostError, HostPage, InteractionEvent, MutationTick, NodeId};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RUNTIME_JS: &str = include_str!("runtime.js");
const MUTATION_BINDING: &str = "__memharvestMutation";

fn host_error(err: AdapterError) -> HostError {
    let retriable = err.retriable;
    HostError::new(err.to_string()).retriable(retriable)
}

/// Expression that installs the page runtime if needed and then runs `call`
/// on it.
fn runtime_call(call: &str) -> String {
    format!("({RUNTIME_JS})({binding}).{call}", binding = json!(MUTATION_BINDING))
}

pub struct CdpHostPage {
    adapter: Arc<CdpAdapter>,
    page: PageId,
    ticks: broadcast::Sender<MutationTick>,
    pump: JoinHandle<()>,
}

impl CdpHostPage {
    /// Attach to (or open) the tab at `start_url` and install the page runtime.
    pub async fn connect(adapter: Arc<CdpAdapter>, start_url: &str) -> Result<Self, AdapterError> {
        let events = adapter.subscribe();
        let page = adapter.attach_page(Some(start_url)).await?;

        adapter.add_binding(page, MUTATION_BINDING).await?;
        adapter
            .add_init_script(page, &format!("({RUNTIME_JS})({});", json!(MUTATION_BINDING)))
            .await?;
        adapter.evaluate(page, &runtime_call("observe()")).await?;

        let (ticks, _) = broadcast::channel(256);
        let pump = tokio::spawn(pump_ticks(events, page, ticks.clone()));
        info!(%page, url = ?adapter.page_url(page), "host page ready");

        Ok(Self {
            adapter,
            page,
            ticks,
            pump,
        })
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    async fn call(&self, call: &str) -> Result<Value, HostError> {
        self.adapter
            .evaluate(self.page, &runtime_call(call))
            .await
            .map_err(host_error)
    }

    /// Run a node action; `false` from the page means the element is gone.
    async fn node_action(&self, node: NodeId, call: &str) -> Result<(), HostError> {
        match self.call(call).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(HostError::new(format!("element {node} is no longer attached"))),
        }
    }
}

impl Drop for CdpHostPage {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Forward binding calls and same-document navigations as mutation ticks.
async fn pump_ticks(
    mut events: broadcast::Receiver<RawEvent>,
    page: PageId,
    ticks: broadcast::Sender<MutationTick>,
) {
    let mut seq = 0u64;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "adapter events lagged");
                seq += 1;
                let _ = ticks.send(MutationTick(seq));
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.page() != Some(page) {
            continue;
        }
        match event {
            RawEvent::BindingCalled { name, .. } if name == MUTATION_BINDING => {}
            RawEvent::NavigatedWithinDocument { .. }
            | RawEvent::PageNavigated { .. }
            | RawEvent::PageLoaded { .. } => {}
            RawEvent::PageClosed { .. } => {
                warn!(%page, "host page closed");
                break;
            }
            _ => continue,
        }
        seq += 1;
        // Nobody listening between waits is normal.
        let _ = ticks.send(MutationTick(seq));
    }
}

#[async_trait]
impl HostPage for CdpHostPage {
    async fn snapshot(&self) -> Result<DomSnapshot, HostError> {
        let raw = self.call("snapshot()").await?;
        serde_json::from_value(raw)
            .map_err(|err| HostError::new(format!("malformed page snapshot: {err}")))
    }

    async fn location(&self) -> Result<String, HostError> {
        let value = self
            .adapter
            .evaluate(self.page, "window.location.href")
            .await
            .map_err(host_error)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| HostError::new("location.href is not a string"))
    }

    async fn navigate(&self, url: &str) -> Result<(), HostError> {
        self.adapter
            .navigate(self.page, url)
            .await
            .map_err(host_error)
    }

    async fn set_fragment(&self, fragment: &str) -> Result<(), HostError> {
        self.adapter
            .evaluate(
                self.page,
                &format!("window.location.hash = {}; true", json!(fragment)),
            )
            .await
            .map(|_| ())
            .map_err(host_error)
    }

    async fn scroll_into_view(&self, node: NodeId) -> Result<(), HostError> {
        self.node_action(node, &format!("scrollIntoView({})", node.0))
            .await
    }

    async fn set_scroll_top(&self, node: NodeId, top: f64) -> Result<(), HostError> {
        self.node_action(node, &format!("setScrollTop({}, {})", node.0, json!(top)))
            .await
    }

    async fn focus(&self, node: NodeId) -> Result<(), HostError> {
        self.node_action(node, &format!("focus({})", node.0)).await
    }

    async fn dispatch(&self, node: NodeId, event: InteractionEvent) -> Result<(), HostError> {
        let payload = json!({
            "type": event.kind.dom_type(),
            "pointer": event.kind.is_pointer(),
            "bubbles": event.kind.bubbles(),
            "buttons": event.kind.buttons(),
            "clientX": event.client_x,
            "clientY": event.client_y,
        });
        self.node_action(node, &format!("dispatch({}, {payload})", node.0))
            .await
    }

    async fn next_frame(&self) -> Result<(), HostError> {
        self.call("frame()").await.map(|_| ())
    }

    fn mutations(&self) -> broadcast::Receiver<MutationTick> {
        self.ticks.subscribe()
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), HostError> {
        match self.call(&format!("copy({})", json!(text))).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(HostError::new("clipboard write was rejected")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_call_passes_the_binding_name() {
        let expr = runtime_call("snapshot()");
        assert!(expr.starts_with("((binding) =>"));
        assert!(expr.ends_with("(\"__memharvestMutation\").snapshot()"));
    }

    #[test]
    fn adapter_errors_keep_retry_hint() {
        let err = host_error(
            AdapterError::new(cdp_adapter::AdapterErrorKind::CommandTimeout)
                .with_hint("Runtime.evaluate timed out")
                .retriable(true),
        );
        assert!(err.retriable);
        assert!(err.message.contains("Runtime.evaluate timed out"));
    }
}
