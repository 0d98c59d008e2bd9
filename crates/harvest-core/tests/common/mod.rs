#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use harvest_core::host::demo::{DemoOptions, DemoPage};
use harvest_core::prompt::{ButtonState, PromptSurface};
use harvest_core::{HarvestConfig, HarvestError, Locale, MemoryHarvester, StatusSnapshot};
use parking_lot::Mutex;

/// Prompt surface that records every call.
#[derive(Default)]
pub struct RecordingSurface {
    pub shown: Mutex<Vec<StatusSnapshot>>,
    pub buttons: Mutex<Vec<ButtonState>>,
    pub closed: Mutex<u32>,
}

impl RecordingSurface {
    pub fn show_count(&self) -> usize {
        self.shown.lock().len()
    }

    pub fn buttons(&self) -> Vec<ButtonState> {
        self.buttons.lock().clone()
    }
}

#[async_trait]
impl PromptSurface for RecordingSurface {
    async fn show(&self, status: &StatusSnapshot) -> Result<(), HarvestError> {
        self.shown.lock().push(status.clone());
        Ok(())
    }

    async fn set_button(&self, state: ButtonState) {
        self.buttons.lock().push(state);
    }

    async fn close(&self) {
        *self.closed.lock() += 1;
    }
}

pub struct Fixture {
    pub page: DemoPage,
    pub harvester: Arc<MemoryHarvester>,
    pub surface: Arc<RecordingSurface>,
}

pub fn fixture(options: DemoOptions) -> Fixture {
    fixture_with(options, HarvestConfig::default())
}

pub fn fixture_with(options: DemoOptions, mut config: HarvestConfig) -> Fixture {
    config.locale = options.locale;
    let page = DemoPage::build(options);
    let surface = Arc::new(RecordingSurface::default());
    let harvester = MemoryHarvester::new(Arc::new(page.host.clone()), config)
        .with_prompt_surface(surface.clone());
    Fixture {
        page,
        harvester: Arc::new(harvester),
        surface,
    }
}

pub fn english(count: usize) -> DemoOptions {
    DemoOptions {
        locale: Locale::En,
        ..DemoOptions::with_records(count)
    }
}
