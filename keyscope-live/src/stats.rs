//! Periodic server figures
//!
//! [`StatsPublisher`] samples key count and memory use on a fixed interval
//! and broadcasts them whether or not anyone is watching.

use keyscope_core::{Envelope, StatsSnapshot, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::NotificationController;
use crate::hub::Hub;

/// Periodically broadcasts store size and memory figures
pub struct StatsPublisher {
    store: Arc<dyn Store>,
    hub: Hub,
    controller: Arc<NotificationController>,
    interval: Duration,
}

impl StatsPublisher {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        hub: Hub,
        controller: Arc<NotificationController>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            controller,
            interval,
        }
    }

    /// Collect a snapshot now. A failing metric is reported as zero / empty.
    pub async fn snapshot(&self) -> StatsSnapshot {
        let db_size = match self.store.db_size().await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Failed to read database size");
                0
            }
        };

        let memory = match self.store.memory_usage().await {
            Ok(memory) => memory,
            Err(e) => {
                warn!(error = %e, "Failed to read memory usage");
                Default::default()
            }
        };

        StatsSnapshot {
            db_size,
            used_memory: memory.used_memory,
            used_memory_human: memory.used_memory_human,
            notifications_on: self.controller.is_enabled(),
        }
    }

    /// Publish on every tick until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; viewers already got a snapshot on connect.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Stats publisher started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = self.snapshot().await;
                    debug!(
                        db_size = snapshot.db_size,
                        used_memory = snapshot.used_memory,
                        "Publishing stats"
                    );
                    self.hub.broadcast(&Envelope::Stats(snapshot)).await;
                }
            }
        }

        info!("Stats publisher stopped");
    }
}
