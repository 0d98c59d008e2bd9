//! Mutation-driven condition waits.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use crate::dom::{DomSnapshot, NodeId};
use crate::errors::{HarvestError, HostError, WaitStep};
use crate::host::HostPage;
use crate::visibility::is_visible;

/// Wait until `probe` yields a value.
///
/// Steps:
/// 1. Subscribe to mutation ticks before the first read so no change is missed
/// 2. Probe the current snapshot and return immediately on success
/// 3. Re-probe on every tick until `timeout` elapses
///
/// Errors from `probe` or the host propagate as-is. The subscription is
/// dropped on every exit path.
pub async fn wait_for<H, T, F>(
    host: &H,
    step: WaitStep,
    timeout: Duration,
    mut probe: F,
) -> Result<T, HarvestError>
where
    H: HostPage + ?Sized,
    F: FnMut(&DomSnapshot) -> Result<Option<T>, HarvestError>,
{
    let deadline = Instant::now() + timeout;
    let mut ticks = host.mutations();

    let snapshot = host.snapshot().await?;
    if let Some(found) = probe(&snapshot)? {
        return Ok(found);
    }

    let mut rounds = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = sleep_until(deadline) => {
                debug!(step = %step, waited_ms = timeout.as_millis() as u64, rounds, "wait expired");
                return Err(HarvestError::timeout(step, timeout));
            }
            tick = ticks.recv() => match tick {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    trace!(step = %step, skipped, "mutation feed lagged");
                }
                Err(RecvError::Closed) => {
                    return Err(HostError::new("mutation feed closed").into());
                }
            }
        }

        rounds += 1;
        let snapshot = host.snapshot().await?;
        if let Some(found) = probe(&snapshot)? {
            trace!(step = %step, rounds, "wait satisfied");
            return Ok(found);
        }
    }
}

/// Wait until `find` resolves to a visible element.
pub async fn wait_for_visible<H, F>(
    host: &H,
    step: WaitStep,
    timeout: Duration,
    mut find: F,
) -> Result<NodeId, HarvestError>
where
    H: HostPage + ?Sized,
    F: FnMut(&DomSnapshot) -> Option<NodeId>,
{
    wait_for(host, step, timeout, |snapshot| {
        Ok(find(snapshot).filter(|node| is_visible(snapshot, *node)))
    })
    .await
}
