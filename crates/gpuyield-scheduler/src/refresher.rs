//! Periodic inventory refresh

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::inventory::InventoryCache;

/// Background task that refreshes the inventory cache on a fixed interval.
///
/// It only touches the cache; the managed workload is never started,
/// stopped or restarted from here.
pub struct InventoryRefresher {
    inventory: Arc<InventoryCache>,
    interval: Duration,
}

impl InventoryRefresher {
    /// Create a refresher ticking every `interval`
    pub fn new(inventory: Arc<InventoryCache>, interval: Duration) -> Self {
        Self {
            inventory,
            interval,
        }
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            source = self.inventory.source_name(),
            "Starting inventory refresher"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup has just scanned
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let free = self.inventory.refresh().await;
                    debug!(free = free.len(), "Periodic inventory refresh done");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Inventory refresher shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Run on a background task
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
