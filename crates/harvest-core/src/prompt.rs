//! Capacity prompt surface.
//!
//! Rendering is left to the embedder. The engine only tracks whether a
//! prompt is up and drives the export button through its states.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::HarvestError;
use crate::facade::StatusSnapshot;

/// State of the prompt's export button.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ButtonState {
    Idle,
    Working,
    Success,
    Error(String),
}

#[async_trait]
pub trait PromptSurface: Send + Sync {
    async fn show(&self, status: &StatusSnapshot) -> Result<(), HarvestError>;
    async fn set_button(&self, state: ButtonState);
    async fn close(&self);
}

/// Surface that only logs, for headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPromptSurface;

#[async_trait]
impl PromptSurface for LogPromptSurface {
    async fn show(&self, status: &StatusSnapshot) -> Result<(), HarvestError> {
        info!(location = %status.location, "memory is full; export is available");
        Ok(())
    }

    async fn set_button(&self, state: ButtonState) {
        info!(state = ?state, "export button");
    }

    async fn close(&self) {
        info!("prompt closed");
    }
}

/// At most one prompt on screen.
#[derive(Debug, Default)]
pub struct PromptGate {
    showing: AtomicBool,
}

impl PromptGate {
    /// Mark the prompt as shown; false when it already is.
    pub fn try_show(&self) -> bool {
        self.showing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn dismiss(&self) {
        self.showing.store(false, Ordering::Release);
    }

    pub fn is_showing(&self) -> bool {
        self.showing.load(Ordering::Acquire)
    }
}
