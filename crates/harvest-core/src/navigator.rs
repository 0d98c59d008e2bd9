//! Settings navigation state machine.
//!
//! Drives the page from the capacity banner to an open saved-memories
//! dialog, one bounded step at a time:
//!
//! `Idle -> TriggerDetected -> SettingsOpen -> PanelActive ->
//! ManagementLocated -> ManageClicked -> ModalOpen`
//!
//! Any failed step ends the run with that step's error.

use std::time::Instant;

use tracing::{debug, info};

use crate::adapter::HostAdapter;
use crate::config::HarvestConfig;
use crate::dom::NodeId;
use crate::errors::{HarvestError, WaitStep};
use crate::host::HostPage;
use crate::interaction::human_click;
use crate::trigger::{self, TriggerSignal};
use crate::usage::{self, UsagePercentage};
use crate::visibility::is_visible;
use crate::waiting::{wait_for, wait_for_visible};

/// The open saved-memories dialog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModalContext {
    pub root: NodeId,
    pub title: String,
    pub usage: Option<UsagePercentage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavState {
    Idle,
    TriggerDetected {
        signal: TriggerSignal,
    },
    SettingsOpen {
        tab: NodeId,
    },
    PanelActive {
        panel: NodeId,
    },
    ManagementLocated {
        section: NodeId,
        usage: Option<UsagePercentage>,
    },
    ManageClicked {
        usage: Option<UsagePercentage>,
    },
    ModalOpen(ModalContext),
}

impl NavState {
    pub fn name(&self) -> &'static str {
        match self {
            NavState::Idle => "idle",
            NavState::TriggerDetected { .. } => "trigger-detected",
            NavState::SettingsOpen { .. } => "settings-open",
            NavState::PanelActive { .. } => "panel-active",
            NavState::ManagementLocated { .. } => "management-located",
            NavState::ManageClicked { .. } => "manage-clicked",
            NavState::ModalOpen(_) => "modal-open",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NavState::ModalOpen(_))
    }
}

pub struct Navigator<'a, H: ?Sized> {
    host: &'a H,
    adapter: &'a dyn HostAdapter,
    config: &'a HarvestConfig,
    state: NavState,
    started: Instant,
}

impl<'a, H> Navigator<'a, H>
where
    H: HostPage + ?Sized,
{
    pub fn new(host: &'a H, adapter: &'a dyn HostAdapter, config: &'a HarvestConfig) -> Self {
        Self {
            host,
            adapter,
            config,
            state: NavState::Idle,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> &NavState {
        &self.state
    }

    /// Drive the machine until the dialog is open.
    pub async fn run(mut self) -> Result<ModalContext, HarvestError> {
        loop {
            if let NavState::ModalOpen(ctx) = &self.state {
                return Ok(ctx.clone());
            }
            self.step().await?;
        }
    }

    /// Advance exactly one transition.
    pub async fn step(&mut self) -> Result<&NavState, HarvestError> {
        let next = match &self.state {
            NavState::Idle => self.detect_trigger().await?,
            NavState::TriggerDetected { .. } => self.open_settings().await?,
            NavState::SettingsOpen { tab } => self.activate_panel(*tab).await?,
            NavState::PanelActive { panel } => self.locate_management(*panel).await?,
            NavState::ManagementLocated { section, usage } => {
                self.click_manage(*section, *usage).await?
            }
            NavState::ManageClicked { usage } => self.await_modal(*usage).await?,
            NavState::ModalOpen(_) => return Ok(&self.state),
        };
        info!(
            from = self.state.name(),
            to = next.name(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "navigation advanced"
        );
        self.state = next;
        Ok(&self.state)
    }

    async fn detect_trigger(&self) -> Result<NavState, HarvestError> {
        let location = self.host.location().await?;
        if !self.adapter.supports_location(&location) {
            return Err(HarvestError::UnsupportedLocation(location));
        }
        let snapshot = self.host.snapshot().await?;
        let signal = trigger::scan(self.adapter, &snapshot, &location);
        if !signal.detected {
            if self.config.require_trigger {
                return Err(HarvestError::not_found("capacity marker"));
            }
            debug!("capacity marker absent; continuing on request");
        }
        Ok(NavState::TriggerDetected { signal })
    }

    async fn open_settings(&self) -> Result<NavState, HarvestError> {
        let location = self.host.location().await?;
        let settings_url = self.adapter.settings_url();
        if location.starts_with(settings_url) {
            self.host.set_fragment(self.adapter.settings_fragment()).await?;
        } else {
            self.host.navigate(settings_url).await?;
        }

        let adapter = self.adapter;
        let tab = wait_for_visible(
            self.host,
            WaitStep::SettingsTab,
            self.config.timeouts.settings_tab(),
            |snapshot| adapter.find_settings_tab(snapshot),
        )
        .await?;

        let snapshot = self.host.snapshot().await?;
        if !adapter.is_tab_selected(&snapshot, tab) {
            human_click(self.host, tab, &self.config.interaction).await?;
        }
        Ok(NavState::SettingsOpen { tab })
    }

    async fn activate_panel(&self, tab: NodeId) -> Result<NavState, HarvestError> {
        let snapshot = self.host.snapshot().await?;
        let panel_id = self
            .adapter
            .panel_id(&snapshot, tab)
            .ok_or_else(|| HarvestError::not_found("personalization panel id"))?;

        let adapter = self.adapter;
        let panel = wait_for_visible(
            self.host,
            WaitStep::PanelActive,
            self.config.timeouts.panel(),
            |snapshot| adapter.find_active_panel(snapshot, &panel_id),
        )
        .await?;
        Ok(NavState::PanelActive { panel })
    }

    async fn locate_management(&self, panel: NodeId) -> Result<NavState, HarvestError> {
        let adapter = self.adapter;
        let (section, usage) = wait_for(
            self.host,
            WaitStep::ManagementSection,
            self.config.timeouts.management(),
            |snapshot| {
                Ok(adapter
                    .find_management_section(snapshot, panel)
                    .map(|section| (section, usage::extract(&snapshot.text_content(section)))))
            },
        )
        .await?;
        debug!(%section, usage = ?usage, "management section located");
        Ok(NavState::ManagementLocated { section, usage })
    }

    async fn click_manage(
        &self,
        section: NodeId,
        usage: Option<UsagePercentage>,
    ) -> Result<NavState, HarvestError> {
        let adapter = self.adapter;
        let snapshot = self.host.snapshot().await?;
        let button = match adapter
            .find_manage_button(&snapshot, section)
            .filter(|button| is_visible(&snapshot, *button))
        {
            Some(button) => button,
            None => {
                wait_for_visible(
                    self.host,
                    WaitStep::ManageButton,
                    self.config.timeouts.manage_button(),
                    |snapshot| adapter.find_manage_button(snapshot, section),
                )
                .await?
            }
        };
        human_click(self.host, button, &self.config.interaction).await?;
        Ok(NavState::ManageClicked { usage })
    }

    async fn await_modal(&self, usage: Option<UsagePercentage>) -> Result<NavState, HarvestError> {
        let adapter = self.adapter;
        let context = wait_for(
            self.host,
            WaitStep::ModalOpen,
            self.config.timeouts.modal(),
            |snapshot| {
                Ok(adapter.find_modal_root(snapshot).map(|root| {
                    let title = adapter
                        .modal_title(snapshot, root)
                        .unwrap_or_else(|| adapter.default_title().to_string());
                    let usage = usage.or_else(|| {
                        adapter
                            .find_usage_box(snapshot, root)
                            .and_then(|node| usage::extract(&snapshot.text_content(node)))
                    });
                    ModalContext { root, title, usage }
                }))
            },
        )
        .await?;
        Ok(NavState::ModalOpen(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChatGptAdapter;
    use crate::host::demo::{DemoOptions, DemoPage};

    #[tokio::test(start_paused = true)]
    async fn walks_every_state_in_order() {
        let page = DemoPage::build(DemoOptions::with_records(5));
        let adapter = ChatGptAdapter::default();
        let config = HarvestConfig::default();
        let mut nav = Navigator::new(&page.host, &adapter, &config);

        let mut seen = vec![nav.state().name()];
        while !nav.state().is_terminal() {
            seen.push(nav.step().await.expect("step").name());
        }
        assert_eq!(
            seen,
            vec![
                "idle",
                "trigger-detected",
                "settings-open",
                "panel-active",
                "management-located",
                "manage-clicked",
                "modal-open",
            ]
        );
        let NavState::ModalOpen(ctx) = nav.state() else {
            panic!("expected modal");
        };
        assert_eq!(ctx.root, page.nodes.modal);
        assert_eq!(ctx.title, "儲存的記憶");
        assert_eq!(ctx.usage.map(|u| u.value()), Some(87));
    }

    #[tokio::test(start_paused = true)]
    async fn already_on_settings_only_sets_fragment() {
        let page = DemoPage::build(DemoOptions {
            location: "https://chatgpt.com/#settings/Personalization".into(),
            ..DemoOptions::with_records(5)
        });
        let adapter = ChatGptAdapter::default();
        let config = HarvestConfig::default();
        Navigator::new(&page.host, &adapter, &config)
            .run()
            .await
            .expect("modal");
        assert_eq!(
            page.host.navigations(),
            vec!["https://chatgpt.com/#settings/Personalization".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_marker_is_not_found_when_required() {
        let page = DemoPage::build(DemoOptions {
            capacity_marker: false,
            ..DemoOptions::with_records(5)
        });
        let adapter = ChatGptAdapter::default();
        let config = HarvestConfig::default();
        let err = Navigator::new(&page.host, &adapter, &config)
            .run()
            .await
            .expect_err("no marker");
        assert!(matches!(err, HarvestError::NotFound { .. }));

        let relaxed = HarvestConfig {
            require_trigger: false,
            ..HarvestConfig::default()
        };
        Navigator::new(&page.host, &adapter, &relaxed)
            .run()
            .await
            .expect("runs without marker");
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_location_is_rejected() {
        let page = DemoPage::build(DemoOptions {
            location: "https://example.com/".into(),
            ..DemoOptions::with_records(5)
        });
        let adapter = ChatGptAdapter::default();
        let config = HarvestConfig::default();
        let err = Navigator::new(&page.host, &adapter, &config)
            .run()
            .await
            .expect_err("unsupported");
        assert!(matches!(err, HarvestError::UnsupportedLocation(_)));
    }
}
