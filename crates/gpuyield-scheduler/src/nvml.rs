//! Inventory source backed by NVML

use async_trait::async_trait;
use gpuyield_core::{DeviceId, DeviceSet, GpuYieldError, GpuYieldResult};
use nvml_wrapper::Nvml;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::inventory::{InventorySource, UtilizationThresholds};

/// Queries GPU utilization through the NVIDIA Management Library
pub struct NvmlInventory {
    nvml: Arc<Nvml>,
    thresholds: UtilizationThresholds,
}

impl NvmlInventory {
    /// Initialize NVML
    pub fn new(thresholds: UtilizationThresholds) -> GpuYieldResult<Self> {
        let nvml = Nvml::init().map_err(|e| {
            GpuYieldError::InventoryUnavailable(format!("NVML initialization failed: {}", e))
        })?;
        Ok(Self {
            nvml: Arc::new(nvml),
            thresholds,
        })
    }
}

/// Blocking NVML scan; run off the async workers
fn query(nvml: &Nvml, thresholds: UtilizationThresholds) -> GpuYieldResult<DeviceSet> {
    let count = nvml.device_count().map_err(|e| {
        GpuYieldError::InventoryUnavailable(format!("Failed to get device count: {}", e))
    })?;

    let mut free = DeviceSet::new();
    for index in 0..count {
        let device = nvml.device_by_index(index).map_err(|e| {
            GpuYieldError::InventoryUnavailable(format!("Device {}: {}", index, e))
        })?;

        let utilization = device.utilization_rates().map_err(|e| {
            GpuYieldError::InventoryUnavailable(format!("Device {} utilization: {}", index, e))
        })?;
        let memory = device.memory_info().map_err(|e| {
            GpuYieldError::InventoryUnavailable(format!("Device {} memory: {}", index, e))
        })?;

        trace!(
            index = index,
            gpu = utilization.gpu,
            memory_used = memory.used,
            memory_total = memory.total,
            "NVML device reading"
        );

        if thresholds.is_free(utilization.gpu as f64, memory.used, memory.total) {
            free.insert(DeviceId(index));
        }
    }

    debug!(devices = count, free = free.len(), "NVML reported devices");
    Ok(free)
}

#[async_trait]
impl InventorySource for NvmlInventory {
    async fn free_devices(&self) -> GpuYieldResult<DeviceSet> {
        let nvml = self.nvml.clone();
        let thresholds = self.thresholds;
        tokio::task::spawn_blocking(move || query(&nvml, thresholds))
            .await
            .map_err(|e| {
                GpuYieldError::InventoryUnavailable(format!("NVML query task failed: {}", e))
            })?
    }

    fn name(&self) -> &'static str {
        "nvml"
    }
}
