//! Engine entry points.
//!
//! [`MemoryHarvester`] ties the navigator, locator and collector together
//! behind a single-flight guard, keeps the last report, and optionally
//! watches the page for the capacity banner.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapter::{ChatGptAdapter, HostAdapter};
use crate::collector;
use crate::config::HarvestConfig;
use crate::errors::{HarvestError, WaitStep};
use crate::guard::SingleFlight;
use crate::host::HostPage;
use crate::locator::{list_ready, locate};
use crate::navigator::Navigator;
use crate::prompt::{ButtonState, LogPromptSurface, PromptGate, PromptSurface};
use crate::report::Report;
use crate::settings::{self, InMemorySettings, SettingsStore};
use crate::trigger;
use crate::waiting::wait_for;

/// Result of a status query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// A visible capacity phrase is on the page.
    pub is_full: bool,
    /// The capacity element exists, visible or not.
    pub marker_present: bool,
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub running: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Report),
    /// Another run held the single-flight flag; nothing was done.
    AlreadyRunning,
}

struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct MemoryHarvester {
    host: Arc<dyn HostPage>,
    adapter: Arc<dyn HostAdapter>,
    config: Arc<HarvestConfig>,
    settings: Arc<dyn SettingsStore>,
    surface: Arc<dyn PromptSurface>,
    flight: SingleFlight,
    prompt: PromptGate,
    last: RwLock<Option<Report>>,
    status_tx: broadcast::Sender<StatusSnapshot>,
    watch: Mutex<Option<WatchHandle>>,
}

impl MemoryHarvester {
    pub fn new(host: Arc<dyn HostPage>, config: HarvestConfig) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        let adapter = Arc::new(ChatGptAdapter::new(config.profile.clone()));
        Self {
            host,
            adapter,
            config: Arc::new(config),
            settings: Arc::new(InMemorySettings::new()),
            surface: Arc::new(LogPromptSurface),
            flight: SingleFlight::new(),
            prompt: PromptGate::default(),
            last: RwLock::new(None),
            status_tx,
            watch: Mutex::new(None),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn HostAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_prompt_surface(mut self, surface: Arc<dyn PromptSurface>) -> Self {
        self.surface = surface;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_busy()
    }

    pub fn last_report(&self) -> Option<Report> {
        self.last.read().clone()
    }

    pub fn last_markdown(&self) -> Option<String> {
        self.last
            .read()
            .as_ref()
            .map(|report| report.render(self.config.locale))
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Run the full flow: navigate, locate, harvest, report.
    ///
    /// A call made while another run is in progress returns
    /// [`RunOutcome::AlreadyRunning`] without touching the page.
    pub async fn main_flow(&self) -> Result<RunOutcome, HarvestError> {
        let Some(_guard) = self.flight.try_enter() else {
            info!("harvest already running; ignoring request");
            return Ok(RunOutcome::AlreadyRunning);
        };
        let run_id = Uuid::new_v4();
        self.run()
            .instrument(info_span!("harvest", %run_id))
            .await
            .map(RunOutcome::Completed)
    }

    async fn run(&self) -> Result<Report, HarvestError> {
        let started = Instant::now();
        let host = self.host.as_ref();
        let adapter = self.adapter.as_ref();

        let modal = Navigator::new(host, adapter, &self.config).run().await?;

        let root = modal.root;
        match wait_for(
            host,
            WaitStep::ListReady,
            self.config.timeouts.list_ready(),
            |snapshot| Ok(list_ready(snapshot, root).then_some(())),
        )
        .await
        {
            Ok(()) => {}
            Err(err) if err.is_timeout() => {
                warn!(%err, "list never showed rows; harvesting anyway");
            }
            Err(err) => return Err(err),
        }

        let snapshot = host.snapshot().await?;
        let descriptor = locate(&snapshot, root);
        info!(
            mode = ?descriptor.mode,
            scroll_host = %descriptor.scroll_host,
            "record container located"
        );

        let harvest = collector::harvest(host, adapter, root, descriptor, &self.config.scroll).await?;
        if harvest.records.is_empty() {
            return Err(HarvestError::EmptyResult);
        }

        let report = Report::new(modal.title, modal.usage, harvest.records);
        *self.last.write() = Some(report.clone());

        let markdown = report.render(self.config.locale);
        if let Err(err) = host.write_clipboard(&markdown).await {
            warn!(%err, "clipboard write failed; report kept in memory");
        }

        info!(
            count = report.count(),
            usage = ?report.usage(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "harvest complete"
        );
        Ok(report)
    }

    /// Scan the page for the capacity banner. Safe to call on every mutation.
    pub async fn check_status(&self) -> Result<StatusSnapshot, HarvestError> {
        let location = self.host.location().await?;
        let snapshot = self.host.snapshot().await?;
        let signal = trigger::scan(self.adapter.as_ref(), &snapshot, &location);
        let status = StatusSnapshot {
            is_full: signal.detected,
            marker_present: self.adapter.find_marker(&snapshot).is_some(),
            timestamp: signal.timestamp,
            location: signal.location,
            running: self.flight.is_busy(),
        };
        // Nobody listening is fine.
        let _ = self.status_tx.send(status.clone());
        Ok(status)
    }

    /// Lightweight check for the capacity element, visible or not.
    pub async fn detect_memory_full(&self) -> Result<bool, HarvestError> {
        let snapshot = self.host.snapshot().await?;
        Ok(self.adapter.find_marker(&snapshot).is_some())
    }

    /// Start watching for the capacity banner; false if already watching.
    pub fn start_watching(self: &Arc<Self>) -> bool {
        let mut slot = self.watch.lock();
        if slot
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
        {
            return false;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).watch_loop(cancel.clone()));
        *slot = Some(WatchHandle { cancel, task });
        true
    }

    /// Stop watching and clear the single-flight flag.
    pub fn stop_watching(&self) {
        if let Some(handle) = self.watch.lock().take() {
            handle.cancel.cancel();
        }
        self.flight.reset();
        self.prompt.dismiss();
        info!("watching stopped");
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    async fn watch_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticks = self.host.mutations();
        let mut poll = interval(self.config.watch.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("watching for capacity marker");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("watcher cancelled");
                    return;
                }
                tick = ticks.recv() => match tick {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        warn!("mutation feed closed; watcher exiting");
                        return;
                    }
                },
                _ = poll.tick() => {}
            }

            match self.check_status().await {
                Ok(status) if status.is_full => {
                    info!(location = %status.location, "capacity marker detected");
                    drop(ticks);
                    self.on_capacity_reached(&status).await;
                    return;
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "status check failed"),
            }
        }
    }

    async fn on_capacity_reached(&self, status: &StatusSnapshot) {
        if self.config.watch.auto_harvest {
            match self.main_flow().await {
                Ok(RunOutcome::Completed(report)) => {
                    info!(count = report.count(), "automatic harvest finished");
                }
                Ok(RunOutcome::AlreadyRunning) => {}
                Err(err) => warn!(%err, "automatic harvest failed"),
            }
            return;
        }
        match self.present_prompt(status).await {
            Ok(true) => {}
            Ok(false) => debug!("capacity prompt not shown"),
            Err(err) => warn!(%err, "capacity prompt failed"),
        }
    }

    /// Show the capacity prompt if preferences allow; true when it went up.
    pub async fn present_prompt(&self, status: &StatusSnapshot) -> Result<bool, HarvestError> {
        let store = self.settings.as_ref();
        if !settings::auto_show_prompt(store).await? {
            return Ok(false);
        }
        if !settings::reminder_allows(store, Utc::now()).await? {
            return Ok(false);
        }
        if !self.prompt.try_show() {
            return Ok(false);
        }
        if let Err(err) = self.surface.show(status).await {
            self.prompt.dismiss();
            return Err(err);
        }
        Ok(true)
    }

    pub fn is_prompt_showing(&self) -> bool {
        self.prompt.is_showing()
    }

    pub async fn dismiss_prompt(&self) {
        self.prompt.dismiss();
        self.surface.close().await;
    }

    /// Close the prompt and keep it closed until `until`, or for good.
    pub async fn snooze_prompt(&self, until: Option<DateTime<Utc>>) -> Result<(), HarvestError> {
        settings::suppress_reminder(self.settings.as_ref(), until).await?;
        self.dismiss_prompt().await;
        Ok(())
    }

    /// Export triggered from the prompt's button.
    ///
    /// The button shows progress, then success or the error; an error state
    /// reverts to idle after the configured delay.
    pub async fn export_from_prompt(&self) -> Result<RunOutcome, HarvestError> {
        self.surface.set_button(ButtonState::Working).await;
        let outcome = self.main_flow().await;
        match &outcome {
            Ok(RunOutcome::Completed(_)) => self.surface.set_button(ButtonState::Success).await,
            Ok(RunOutcome::AlreadyRunning) => {}
            Err(err) => {
                self.surface
                    .set_button(ButtonState::Error(err.user_message(self.config.locale)))
                    .await;
                let surface = Arc::clone(&self.surface);
                let delay = self.config.watch.prompt_revert();
                tokio::spawn(async move {
                    sleep(delay).await;
                    surface.set_button(ButtonState::Idle).await;
                });
            }
        }
        outcome
    }
}

impl Drop for MemoryHarvester {
    fn drop(&mut self) {
        if let Some(handle) = self.watch.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::demo::{DemoOptions, DemoPage};

    fn harvester(options: DemoOptions) -> (Arc<MemoryHarvester>, DemoPage) {
        let page = DemoPage::build(options);
        let harvester = MemoryHarvester::new(Arc::new(page.host.clone()), HarvestConfig::default());
        (Arc::new(harvester), page)
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_visible_marker() {
        let (harvester, page) = harvester(DemoOptions::with_records(5));
        let mut updates = harvester.subscribe_status();
        let status = harvester.check_status().await.unwrap();
        assert!(status.is_full);
        assert!(status.marker_present);
        assert!(!status.running);
        assert_eq!(updates.recv().await.unwrap(), status);

        let marker = page.nodes.marker.expect("marker");
        page.host.mutate(|dom| dom.set_shown(marker, false));
        let status = harvester.check_status().await.unwrap();
        assert!(!status.is_full);
        assert!(status.marker_present);
        assert!(harvester.detect_memory_full().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_call_is_ignored() {
        let (harvester, _page) = harvester(DemoOptions::with_records(12));
        let first = {
            let harvester = Arc::clone(&harvester);
            tokio::spawn(async move { harvester.main_flow().await })
        };
        tokio::task::yield_now().await;
        assert!(harvester.is_running());
        assert_eq!(harvester.main_flow().await.unwrap(), RunOutcome::AlreadyRunning);

        let outcome = first.await.unwrap().unwrap();
        let RunOutcome::Completed(report) = outcome else {
            panic!("first run should complete");
        };
        assert_eq!(report.count(), 12);
        assert!(!harvester.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_watching_clears_the_flag() {
        let (harvester, _page) = harvester(DemoOptions::with_records(3));
        let _held = harvester.flight.try_enter().expect("hold flag");
        assert!(harvester.is_running());
        harvester.stop_watching();
        assert!(!harvester.is_running());
    }
}
