use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use harvest_core::MemoryHarvester;
use parking_lot::Mutex;

#[derive(Clone)]
pub struct ServeState {
    pub(crate) harvester: Arc<MemoryHarvester>,
    pub(crate) health: Arc<ServeHealth>,
}

impl ServeState {
    pub fn new(harvester: Arc<MemoryHarvester>) -> Self {
        Self {
            harvester,
            health: Arc::new(ServeHealth::new()),
        }
    }

    pub fn health(&self) -> &ServeHealth {
        &self.health
    }
}

/// Liveness plus the outcome of the most recent request.
#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    last_request: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn record(&self, error: Option<String>) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_request.store(duration.as_secs(), Ordering::SeqCst);
        }
        *self.last_error.lock() = error;
    }

    pub(crate) fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            live: self.live.load(Ordering::SeqCst),
            last_request: match self.last_request.load(Ordering::SeqCst) {
                0 => None,
                value => Some(value),
            },
            last_error: self.last_error.lock().clone(),
        }
    }
}

pub(crate) struct ServeHealthSnapshot {
    pub(crate) live: bool,
    pub(crate) last_request: Option<u64>,
    pub(crate) last_error: Option<String>,
}
