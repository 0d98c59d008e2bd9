//! Single-flight flag for harvest runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const IDLE: u64 = 0;

#[derive(Debug, Default)]
struct FlightState {
    /// Epoch of the current holder, or `IDLE`.
    holder: AtomicU64,
    next_epoch: AtomicU64,
}

/// Allows one run at a time.
#[derive(Clone, Debug, Default)]
pub struct SingleFlight {
    state: Arc<FlightState>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag; `None` while another run holds it.
    pub fn try_enter(&self) -> Option<SingleFlightGuard> {
        let epoch = self.state.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        self.state
            .holder
            .compare_exchange(IDLE, epoch, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard {
                state: Arc::clone(&self.state),
                epoch,
            })
    }

    pub fn is_busy(&self) -> bool {
        self.state.holder.load(Ordering::Acquire) != IDLE
    }

    /// Clear the flag regardless of who holds it. The evicted guard no longer
    /// owns the flag and its drop leaves later holders alone.
    pub fn reset(&self) {
        self.state.holder.store(IDLE, Ordering::Release);
    }
}

/// Releases the flag on drop, if it still holds it.
#[derive(Debug)]
pub struct SingleFlightGuard {
    state: Arc<FlightState>,
    epoch: u64,
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        let _ = self.state.holder.compare_exchange(
            self.epoch,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_refused_until_release() {
        let flight = SingleFlight::new();
        let guard = flight.try_enter().expect("first entry");
        assert!(flight.is_busy());
        assert!(flight.try_enter().is_none());
        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_enter().is_some());
    }

    #[test]
    fn reset_clears_a_held_flag() {
        let flight = SingleFlight::new();
        let _guard = flight.try_enter().expect("entry");
        flight.reset();
        assert!(flight.try_enter().is_some());
    }

    #[test]
    fn evicted_guard_does_not_release_the_next_holder() {
        let flight = SingleFlight::new();
        let first = flight.try_enter().expect("first entry");
        flight.reset();
        let second = flight.try_enter().expect("entry after reset");

        drop(first);
        assert!(flight.is_busy());
        assert!(flight.try_enter().is_none());

        drop(second);
        assert!(!flight.is_busy());
    }
}
