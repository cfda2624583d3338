//! Device inventory sources and the free-device cache

use async_trait::async_trait;
use gpuyield_core::{display_devices, Claim, DeviceSet, GpuYieldResult};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Reports which devices are currently free
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Query the devices considered free right now
    async fn free_devices(&self) -> GpuYieldResult<DeviceSet>;

    /// Get the source name
    fn name(&self) -> &'static str;
}

/// Utilization limits below which a device counts as free
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtilizationThresholds {
    /// Maximum GPU utilization in percent
    pub max_gpu_utilization: f64,
    /// Maximum memory utilization in percent
    pub max_memory_utilization: f64,
}

impl Default for UtilizationThresholds {
    fn default() -> Self {
        Self {
            max_gpu_utilization: 1.0,
            max_memory_utilization: 1.0,
        }
    }
}

impl UtilizationThresholds {
    /// Decide whether a device with the given readings is free
    pub fn is_free(&self, gpu_utilization: f64, memory_used: u64, memory_total: u64) -> bool {
        if memory_total == 0 {
            return false;
        }
        let memory_utilization = memory_used as f64 / memory_total as f64 * 100.0;
        gpu_utilization < self.max_gpu_utilization
            && memory_utilization < self.max_memory_utilization
    }
}

/// Source that always reports the same devices
pub struct StaticInventory {
    devices: DeviceSet,
}

impl StaticInventory {
    /// Create a static source over `devices`
    pub fn new(devices: DeviceSet) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn free_devices(&self) -> GpuYieldResult<DeviceSet> {
        Ok(self.devices.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Last known free devices, refreshed from an [`InventorySource`].
///
/// Devices held by the managed workload look busy to the source, so every
/// refresh adds them back: the cached set is what is free to anyone outside
/// the controller.
pub struct InventoryCache {
    source: Arc<dyn InventorySource>,
    free: RwLock<DeviceSet>,
    held: watch::Sender<DeviceSet>,
    /// Serializes query + replace so an older result never overwrites a newer one
    refresh_lock: Mutex<()>,
}

impl InventoryCache {
    /// Create an empty cache backed by `source`
    pub fn new(source: Arc<dyn InventorySource>) -> Self {
        let (held, _) = watch::channel(DeviceSet::new());
        Self {
            source,
            free: RwLock::new(DeviceSet::new()),
            held,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Name of the backing source
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Last cached free devices, without querying the source
    pub async fn current(&self) -> DeviceSet {
        self.free.read().await.clone()
    }

    /// Record the devices the managed workload runs on
    pub fn set_held(&self, devices: DeviceSet) {
        self.held.send_replace(devices);
    }

    /// Devices the managed workload runs on
    pub fn held(&self) -> DeviceSet {
        self.held.borrow().clone()
    }

    /// Query the source and cache `fresh ∪ held`.
    ///
    /// If the source fails the previous set is kept and returned.
    pub async fn refresh(&self) -> DeviceSet {
        self.refresh_excluding(&Claim::default()).await
    }

    /// Query the source and cache `(fresh ∪ held) − claim`.
    ///
    /// If the source fails, the adjustment is applied to the previous
    /// cached set instead.
    pub async fn refresh_excluding(&self, claim: &Claim) -> DeviceSet {
        let _guard = self.refresh_lock.lock().await;

        let base = match self.source.free_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(
                    source = self.source.name(),
                    error = %e,
                    "Inventory refresh failed, keeping previous free devices"
                );
                self.free.read().await.clone()
            }
        };

        let held = self.held();
        let merged: DeviceSet = base.union(&held).copied().collect();
        let free = claim.exclude_from(&merged);

        let mut cached = self.free.write().await;
        if *cached != free {
            info!(
                previous = %display_devices(&cached),
                free = %display_devices(&free),
                "Free GPUs updated"
            );
        } else {
            debug!(free = %display_devices(&free), "Free GPUs unchanged");
        }
        *cached = free.clone();

        free
    }
}
