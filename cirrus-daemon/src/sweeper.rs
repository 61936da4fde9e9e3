//! Periodic removal of expired attempt counters.

use std::time::Duration;

use cirrus_attest::{AttemptStore, Clock, StoreError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run one sweep, logging how many counters were removed.
pub async fn sweep_once<S, C>(store: &S, clock: &C) -> Result<usize, StoreError>
where
    S: AttemptStore + ?Sized,
    C: Clock + ?Sized,
{
    let count = store.sweep(clock.now()).await?;
    if count > 0 {
        tracing::info!(count, "Expired auth attempts removed");
    } else {
        tracing::debug!("No expired auth attempts");
    }
    Ok(count)
}

/// Spawn a task sweeping every `interval` until `shutdown` fires.
///
/// Sweep failures are logged and retried on the next tick. The first sweep
/// runs one full interval after spawning.
pub fn spawn_sweeper<S, C>(
    store: S,
    clock: C,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()>
where
    S: AttemptStore + 'static,
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?interval, "Attempt sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(&store, &clock).await {
                        tracing::warn!(error = %e, "Failed to sweep auth attempts");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping attempt sweeper");
                    break;
                }
            }
        }
    })
}
