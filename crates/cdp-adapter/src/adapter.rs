use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::PageId;
use crate::metrics;
use crate::registry::{PageEntry, Registry};
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Broadcast sender the adapter publishes page events on.
pub type EventBus = broadcast::Sender<RawEvent>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTargetsResult {
    target_infos: Vec<TargetInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingCalledParams {
    name: String,
    #[serde(default)]
    payload: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedFrame {
    #[serde(default)]
    parent_id: Option<String>,
    url: String,
    #[serde(default)]
    url_fragment: Option<String>,
}

#[derive(Deserialize)]
struct FrameNavigatedParams {
    frame: NavigatedFrame,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigatedWithinDocumentParams {
    frame_id: String,
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetIdParams {
    target_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfoChangedParams {
    target_info: TargetInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedParams {
    session_id: String,
}

fn decode<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, AdapterError> {
    serde_json::from_value(params).map_err(AdapterError::decode)
}

/// Session-oriented front of the DevTools connection.
pub struct CdpAdapter {
    cfg: CdpConfig,
    bus: EventBus,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig, bus: EventBus) -> Self {
        info!(
            target: "cdp-adapter",
            executable = %cfg.executable.display(),
            headless = cfg.headless,
            attach = cfg.websocket_url.is_some(),
            "using chromium transport"
        );
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        Self {
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
        }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    /// Start the transport and the event pump. Calling it twice is a no-op.
    pub async fn start(self: Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        self.tasks.lock().await.push(loop_task);
        info!(target: "cdp-adapter", "event loop started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    /// Attach to an open tab whose URL contains `url_hint`, opening a new
    /// tab on the hint when none matches.
    pub async fn attach_page(&self, url_hint: Option<&str>) -> Result<PageId, AdapterError> {
        let targets: GetTargetsResult =
            decode(self.send_command("Target.getTargets", json!({})).await?)?;

        let candidate = targets
            .target_infos
            .into_iter()
            .filter(|info| info.target_type == "page")
            .find(|info| match url_hint {
                Some(hint) => info.url.contains(hint),
                None => true,
            });

        let (target_id, url) = match candidate {
            Some(info) => {
                if let Some(page) = self.registry.page_for_target(&info.target_id) {
                    debug!(target: "cdp-adapter", %page, "tab already attached");
                    return Ok(page);
                }
                (info.target_id, info.url)
            }
            None => {
                let url = url_hint.unwrap_or("about:blank").to_string();
                let created = self
                    .send_command("Target.createTarget", json!({ "url": url }))
                    .await?;
                let target_id = created
                    .get("targetId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint("createTarget missing targetId")
                    })?
                    .to_string();
                (target_id, url)
            }
        };

        let attached = self
            .send_command(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::TargetNotFound)
                    .with_hint(format!("attachToTarget returned no session for {target_id}"))
            })?
            .to_string();

        let page = PageId::new();
        self.registry.insert(
            page,
            PageEntry {
                target_id,
                session_id,
                url: (!url.is_empty()).then_some(url),
            },
        );

        self.send_page_command(page, "Page.enable", json!({})).await?;
        self.send_page_command(page, "Runtime.enable", json!({}))
            .await?;
        info!(target: "cdp-adapter", %page, "attached to page target");
        Ok(page)
    }

    /// Evaluate `expression` in the page's main world and return its value.
    pub async fn evaluate(&self, page: PageId, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script raised exception")
                .to_string();
            return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                .with_hint(text)
                .with_data(details.clone()));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn navigate(&self, page: PageId, url: &str) -> Result<(), AdapterError> {
        let response = self
            .send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("navigation to {url} failed: {text}"))
                .retriable(true));
        }
        self.registry.set_url(&page, url);
        Ok(())
    }

    /// Expose `window.<name>(payload)` to page scripts; calls surface as
    /// [`RawEvent::BindingCalled`].
    pub async fn add_binding(&self, page: PageId, name: &str) -> Result<(), AdapterError> {
        self.send_page_command(page, "Runtime.addBinding", json!({ "name": name }))
            .await?;
        Ok(())
    }

    /// Run `source` in every new document of the page before its own scripts.
    pub async fn add_init_script(&self, page: PageId, source: &str) -> Result<String, AdapterError> {
        let response = self
            .send_page_command(
                page,
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Ok(response
            .get("identifier")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub fn page_url(&self, page: PageId) -> Option<String> {
        self.registry.get(&page).and_then(|entry| entry.url)
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(event) => {
                        backoff = MIN_BACKOFF;
                        if let Err(err) = self.process_event(event) {
                            let _ = self.bus.send(RawEvent::Error {
                                page: None,
                                message: format!("cdp event handling error: {err}"),
                            });
                        }
                    }
                    None => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        self.handle_transport_disconnect();
                        warn!(target: "cdp-adapter", "transport stream ended; attempting restart");
                        if let Err(err) = self.transport.start().await {
                            warn!(target: "cdp-adapter", %err, "transport restart failed");
                        }
                        sleep(backoff).await;
                        backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    /// Sessions do not survive a reconnect; drop them and tell listeners.
    fn handle_transport_disconnect(&self) {
        let pages = self.registry.pages();
        let had_pages = !pages.is_empty();
        for page in pages {
            self.registry.remove(&page);
            let _ = self.bus.send(RawEvent::PageClosed { page });
        }
        let message = if had_pages {
            "cdp transport restarted; attached pages were reset"
        } else {
            "cdp transport restarted"
        };
        let _ = self.bus.send(RawEvent::Error {
            page: None,
            message: message.to_string(),
        });
    }

    fn process_event(&self, event: TransportEvent) -> Result<(), AdapterError> {
        metrics::record_event();
        let page = event
            .session_id
            .as_deref()
            .and_then(|session| self.registry.page_for_session(session));

        match event.method.as_str() {
            "Runtime.bindingCalled" => {
                let params: BindingCalledParams = decode(event.params)?;
                if let Some(page) = page {
                    metrics::record_binding_call();
                    self.emit(RawEvent::BindingCalled {
                        page,
                        name: params.name,
                        payload: params.payload,
                    });
                }
            }
            "Page.frameNavigated" => {
                let params: FrameNavigatedParams = decode(event.params)?;
                if let (Some(page), None) = (page, params.frame.parent_id.as_ref()) {
                    let mut url = params.frame.url;
                    if let Some(fragment) = params.frame.url_fragment {
                        url.push_str(&fragment);
                    }
                    self.registry.set_url(&page, url.clone());
                    self.emit(RawEvent::PageNavigated { page, url });
                }
            }
            "Page.navigatedWithinDocument" => {
                let params: NavigatedWithinDocumentParams = decode(event.params)?;
                if let Some(page) = page {
                    // The main frame shares its id with the page target.
                    let main_frame = self
                        .registry
                        .get(&page)
                        .map(|entry| entry.target_id == params.frame_id)
                        .unwrap_or(false);
                    if main_frame {
                        self.registry.set_url(&page, params.url.clone());
                        self.emit(RawEvent::NavigatedWithinDocument {
                            page,
                            url: params.url,
                        });
                    }
                }
            }
            "Page.loadEventFired" => {
                if let Some(page) = page {
                    self.emit(RawEvent::PageLoaded { page });
                }
            }
            "Target.targetInfoChanged" => {
                let params: TargetInfoChangedParams = decode(event.params)?;
                if let Some(page) = self.registry.page_for_target(&params.target_info.target_id) {
                    if !params.target_info.url.is_empty() {
                        self.registry.set_url(&page, params.target_info.url);
                    }
                }
            }
            "Target.targetDestroyed" => {
                let params: TargetIdParams = decode(event.params)?;
                if let Some(page) = self.registry.page_for_target(&params.target_id) {
                    self.close_page(page);
                }
            }
            "Target.detachedFromTarget" => {
                let params: DetachedParams = decode(event.params)?;
                if let Some(page) = self.registry.page_for_session(&params.session_id) {
                    self.close_page(page);
                }
            }
            other => {
                debug!(target: "cdp-adapter", method = %other, "unhandled cdp event");
            }
        }
        Ok(())
    }

    fn close_page(&self, page: PageId) {
        if self.registry.remove(&page).is_some() {
            self.emit(RawEvent::PageClosed { page });
        }
    }

    fn emit(&self, event: RawEvent) {
        // No subscribers is fine.
        let _ = self.bus.send(event);
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.send_to(CommandTarget::Browser, method, params).await
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.registry.session(&page).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("no cdp session for {page}"))
        })?;
        self.send_to(CommandTarget::Session(session), method, params)
            .await
    }

    async fn send_to(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let start = Instant::now();
        metrics::record_command(method);
        match self.transport.send_command(target, method, params).await {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }
}
