//! Periodic sync trigger with an authorization gate.
//!
//! The [`Scheduler`] reads `syncSettings` before every trigger. Without an
//! authorized destination it returns immediately: no network traffic, no
//! status change and no execution context. Otherwise it hands the run to the
//! [`ExecutionBridge`].

pub mod bridge;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::store::KeyValueStore;
use crate::sync::SyncSettings;

pub use bridge::{
    BridgeMessage, BridgeReply, Envelope, ExecutionBridge, RunSummary, SyncWorker, TriggerOutcome,
};

pub struct Scheduler {
    store: KeyValueStore,
    bridge: Arc<ExecutionBridge>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(store: KeyValueStore, bridge: Arc<ExecutionBridge>, interval: Duration) -> Self {
        Self {
            store,
            bridge,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when a destination has been set up and not disconnected.
    pub async fn is_authorized(&self) -> Result<bool> {
        Ok(SyncSettings::load(&self.store).await?.is_authorized)
    }

    /// Gate, then delegate one run to the execution context.
    pub async fn sync_now(&self) -> Result<TriggerOutcome> {
        if !self.is_authorized().await? {
            tracing::debug!("sync trigger ignored: destination not authorized");
            return Ok(TriggerOutcome::NotAuthorized);
        }
        self.bridge.execute_sync().await
    }

    /// Fire [`sync_now`](Self::sync_now) every interval until `shutdown` is cancelled.
    ///
    /// The first run happens one interval after start. Ticks missed while a
    /// run is still going are dropped, not queued.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        tracing::info!(
            "scheduler started, syncing every {}s",
            self.interval.as_secs()
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sync_now().await {
                        Ok(TriggerOutcome::Completed(summary)) => tracing::info!(
                            "scheduled sync done: {}/{} files",
                            summary.files_synced,
                            summary.files_total
                        ),
                        Ok(TriggerOutcome::Failed { error, .. }) => {
                            tracing::warn!("scheduled sync failed: {}", error)
                        }
                        Ok(outcome) => tracing::debug!("scheduled sync: {:?}", outcome),
                        Err(e) => tracing::error!("scheduled sync could not run: {}", e),
                    }
                }
            }
        }
        self.bridge.shutdown().await;
        tracing::info!("scheduler stopped");
    }
}
