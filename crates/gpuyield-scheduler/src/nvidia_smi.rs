//! Inventory source backed by `nvidia-smi`

use async_trait::async_trait;
use gpuyield_core::{DeviceId, DeviceSet, GpuYieldError, GpuYieldResult};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use crate::inventory::{InventorySource, UtilizationThresholds};

const QUERY: &str = "--query-gpu=index,utilization.gpu,memory.used,memory.total";
const FORMAT: &str = "--format=csv,noheader,nounits";

/// One device row reported by `nvidia-smi`
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub index: u32,
    /// GPU utilization in percent, if reported
    pub gpu_utilization: Option<f64>,
    /// Used memory in MiB, if reported
    pub memory_used: Option<u64>,
    /// Total memory in MiB, if reported
    pub memory_total: Option<u64>,
}

impl DeviceReading {
    /// Devices with unreported readings are treated as busy
    pub fn is_free(&self, thresholds: &UtilizationThresholds) -> bool {
        match (self.gpu_utilization, self.memory_used, self.memory_total) {
            (Some(util), Some(used), Some(total)) => thresholds.is_free(util, used, total),
            _ => false,
        }
    }
}

/// Queries GPU utilization by running `nvidia-smi`
pub struct NvidiaSmiInventory {
    binary: PathBuf,
    thresholds: UtilizationThresholds,
}

impl NvidiaSmiInventory {
    /// Create a source using `nvidia-smi` from `PATH`
    pub fn new(thresholds: UtilizationThresholds) -> Self {
        Self::with_binary(PathBuf::from("nvidia-smi"), thresholds)
    }

    /// Create a source using a specific `nvidia-smi` binary
    pub fn with_binary(binary: PathBuf, thresholds: UtilizationThresholds) -> Self {
        Self { binary, thresholds }
    }
}

/// Parse `nvidia-smi` CSV output (`index, util, used, total` per line)
pub fn parse_readings(output: &str) -> GpuYieldResult<Vec<DeviceReading>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> GpuYieldResult<DeviceReading> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(GpuYieldError::InventoryUnavailable(format!(
            "unexpected nvidia-smi line: '{}'",
            line
        )));
    }

    let index = fields[0].parse::<u32>().map_err(|e| {
        GpuYieldError::InventoryUnavailable(format!("bad GPU index '{}': {}", fields[0], e))
    })?;

    Ok(DeviceReading {
        index,
        gpu_utilization: fields[1].parse().ok(),
        memory_used: fields[2].parse().ok(),
        memory_total: fields[3].parse().ok(),
    })
}

#[async_trait]
impl InventorySource for NvidiaSmiInventory {
    async fn free_devices(&self) -> GpuYieldResult<DeviceSet> {
        let output = Command::new(&self.binary)
            .arg(QUERY)
            .arg(FORMAT)
            .output()
            .await
            .map_err(|e| {
                GpuYieldError::InventoryUnavailable(format!(
                    "failed to run {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(GpuYieldError::InventoryUnavailable(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let readings = parse_readings(&String::from_utf8_lossy(&output.stdout))?;
        debug!(devices = readings.len(), "nvidia-smi reported devices");

        Ok(readings
            .iter()
            .filter(|r| r.is_free(&self.thresholds))
            .map(|r| DeviceId(r.index))
            .collect())
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}
