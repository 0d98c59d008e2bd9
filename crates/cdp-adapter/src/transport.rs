use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{env_flag, CdpConfig};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type Responder = oneshot::Sender<Result<Value, AdapterError>>;

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>> + Send + Sync,
>;

/// Transport over a single DevTools websocket, relaunching Chromium when
/// the connection dies.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<RuntimeState>>>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { RuntimeState::start(cfg).await.map(Arc::new) })
        });
        Self::with_factory(cfg, factory)
    }

    fn with_factory(cfg: CdpConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
            info!(target: "cdp-transport", "runtime is gone; reconnecting");
        }

        let runtime = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(runtime.clone());
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
                self.deadline(),
            )
            .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.runtime().await {
            Ok(runtime) => runtime.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        runtime
            .send_internal(target, method, params, self.deadline())
            .await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: Responder,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => {
                info!(target: "cdp-transport", url = %url, "attaching to running browser");
                (None, url)
            }
            None => {
                let mut child = browser_config(&cfg)?.launch().map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Launch)
                        .with_hint(format!("failed to launch chromium: {err}"))
                })?;
                let ws_url = extract_ws_url(&mut child, LAUNCH_TIMEOUT).await?;
                (Some(child), ws_url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let alive = Arc::new(AtomicBool::new(true));

        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            let result = run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", %err, "transport loop terminated with error");
            }
        });

        let heartbeat_task = spawn_heartbeat(
            command_tx.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms).min(Duration::from_secs(5)),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::CommandTimeout)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        let Ok(mut guard) = self.child.try_lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", %err, "failed to kill chromium child");
                        }
                    });
                }
                Err(_) => {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

/// Ping the browser so a dead connection is noticed between harvests.
fn spawn_heartbeat(
    sender: mpsc::Sender<ControlMessage>,
    alive: Arc<AtomicBool>,
    every: Duration,
    response_deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the connection was just verified.
        ticker.tick().await;

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;

            let (resp_tx, resp_rx) = oneshot::channel();
            let message = ControlMessage {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: json!({}),
                responder: resp_tx,
            };
            if sender.send(message).await.is_err() {
                debug!(target: "cdp-transport", "heartbeat channel closed");
                break;
            }

            match tokio::time::timeout(response_deadline, resp_rx).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", %err, "heartbeat command error");
                    break;
                }
                Ok(Err(_)) => {
                    debug!(target: "cdp-transport", "heartbeat response channel closed");
                    break;
                }
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    alive.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }))
}

fn resolve_profile_dir(cfg: &CdpConfig) -> Result<PathBuf, AdapterError> {
    let profile_dir = if cfg.user_data_dir.is_absolute() {
        cfg.user_data_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?
            .join(&cfg.user_data_dir)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Launch)
            .with_hint(format!("failed to create {}: {err}", profile_dir.display()))
    })?;
    Ok(profile_dir)
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if cfg.executable.as_os_str().is_empty() {
        return Err(AdapterError::new(AdapterErrorKind::Launch)
            .with_hint("no chrome executable found; set MEMHARVEST_CHROME or browser.executable"));
    }
    if !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::Launch)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({ "expected": cfg.executable })));
    }

    let mut builder = BrowserConfig::builder()
        .chrome_executable(cfg.executable.clone())
        .user_data_dir(resolve_profile_dir(cfg)?)
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(LAUNCH_TIMEOUT);

    if !cfg.headless {
        builder = builder.with_head();
    }
    if env_flag("MEMHARVEST_DISABLE_SANDBOX").unwrap_or(false) {
        builder = builder.no_sandbox();
    }

    let mut args: Vec<String> = [
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    if cfg.headless {
        args.push("--headless=new".into());
    }
    args.extend(cfg.extra_args.iter().cloned());

    builder.args(args).build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

async fn run_loop(
    mut conn: Connection<CdpEventMessage>,
    mut command_rx: mpsc::Receiver<ControlMessage>,
    event_tx: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut inflight: HashMap<CallId, Responder> = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = command_rx.recv() => {
                submit(&mut conn, cmd, &mut inflight)?;
            }
            message = conn.next() => match message {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(sender) = inflight.remove(&resp.id) {
                        let _ = sender.send(extract_payload(resp));
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    if let Err(err) = forward_event(event, &event_tx).await {
                        warn!(target: "cdp-transport", %err, "failed to forward event");
                    }
                }
                Some(Err(err)) => {
                    let err = map_cdp_error(err);
                    fail_inflight(&mut inflight, &err);
                    return Err(err);
                }
                None => {
                    let err = AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("cdp connection closed");
                    fail_inflight(&mut inflight, &err);
                    return Ok(());
                }
            }
        }
    }
}

fn fail_inflight(inflight: &mut HashMap<CallId, Responder>, err: &AdapterError) {
    for (_, sender) in inflight.drain() {
        let _ = sender.send(Err(err.clone()));
    }
}

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    cmd: ControlMessage,
    inflight: &mut HashMap<CallId, Responder>,
) -> Result<(), AdapterError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
    };

    let method_id: MethodId = cmd.method.into();
    match conn.submit_command(method_id, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.responder);
            Ok(())
        }
        Err(err) => {
            let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.responder.send(Err(err.clone()));
            Err(err)
        }
    }
}

async fn forward_event(
    event: CdpEventMessage,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to decode cdp event: {err}"))
    })?;

    event_tx
        .send(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        })
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
}

fn extract_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::CommandTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::ScriptException).with_hint(hint)
        }
        CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}
