use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::{event_bus, CdpAdapter};
use harvest_core::host::demo::{DemoOptions, DemoPage};
use harvest_core::settings::JsonFileSettings;
use harvest_core::{HarvestConfig, MemoryHarvester};
use tokio::sync::OnceCell;
use tracing::info;

use crate::browser::CdpHostPage;
use crate::config::AppConfig;

pub struct CliContext {
    config: Arc<AppConfig>,
    config_path: PathBuf,
    dry_run: bool,
    demo_records: usize,
    harvester: OnceCell<Arc<MemoryHarvester>>,
}

impl CliContext {
    pub fn new(config: AppConfig, config_path: PathBuf, dry_run: bool, demo_records: usize) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            dry_run,
            demo_records,
            harvester: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Shared harvester built from the loaded configuration.
    pub async fn harvester(&self) -> Result<Arc<MemoryHarvester>> {
        self.harvester
            .get_or_try_init(|| async {
                self.build_harvester(self.config.harvest.clone())
                    .await
                    .map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    /// Harvester with a one-off tweak to the engine configuration.
    pub async fn harvester_with<F>(&self, tweak: F) -> Result<Arc<MemoryHarvester>>
    where
        F: FnOnce(&mut HarvestConfig),
    {
        let mut config = self.config.harvest.clone();
        tweak(&mut config);
        self.build_harvester(config).await.map(Arc::new)
    }

    async fn build_harvester(&self, config: HarvestConfig) -> Result<MemoryHarvester> {
        if self.dry_run {
            let demo = DemoPage::build(DemoOptions {
                locale: config.locale,
                ..DemoOptions::with_records(self.demo_records)
            });
            info!(records = self.demo_records, "dry run against the demo page");
            return Ok(MemoryHarvester::new(Arc::new(demo.host.clone()), config));
        }

        let settings_path = self.config.resolved_settings_path();
        let settings = JsonFileSettings::open(&settings_path)
            .await
            .with_context(|| format!("opening settings {}", settings_path.display()))?;

        let (bus, _rx) = event_bus(256);
        let adapter = Arc::new(CdpAdapter::new(self.config.browser.clone(), bus));
        Arc::clone(&adapter)
            .start()
            .await
            .context("starting chromium")?;
        let page = CdpHostPage::connect(adapter, &self.config.start_url)
            .await
            .with_context(|| format!("attaching to {}", self.config.start_url))?;

        Ok(MemoryHarvester::new(Arc::new(page), config).with_settings(Arc::new(settings)))
    }
}
