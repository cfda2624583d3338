//! Configuration types for gpuyield

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gpu::{device_set, DeviceSet};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Managed workload configuration
    pub workload: WorkloadConfig,
    /// Device inventory configuration
    pub inventory: InventoryConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::GpuYieldError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::GpuYieldError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::GpuYieldError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check that the configuration can drive a controller
    pub fn validate(&self) -> Result<(), crate::GpuYieldError> {
        match self.workload.command.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(crate::GpuYieldError::Config(
                    "a workload command is required".to_string(),
                ))
            }
            Some(_) => {}
        }
        if self.workload.visible_devices_env.trim().is_empty() {
            return Err(crate::GpuYieldError::Config(
                "visible_devices_env must not be empty".to_string(),
            ));
        }
        if self.inventory.refresh_interval_secs == 0 {
            return Err(crate::GpuYieldError::Config(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("max_gpu_utilization", self.inventory.max_gpu_utilization),
            ("max_memory_utilization", self.inventory.max_memory_utilization),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(crate::GpuYieldError::Config(format!(
                    "{} must be a percentage between 0 and 100, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the HTTP server
    pub address: String,
    /// Port for the HTTP server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Managed workload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Shell command line to launch
    pub command: Option<String>,
    /// Environment variable restricting the devices the workload sees
    pub visible_devices_env: String,
    /// Wait after killing the workload before its devices are reused
    pub settle_delay_ms: u64,
    /// Upper bound on waiting for a killed workload to exit
    pub kill_timeout_secs: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            command: None,
            visible_devices_env: "CUDA_VISIBLE_DEVICES".to_string(),
            settle_delay_ms: 1000,
            kill_timeout_secs: 10,
        }
    }
}

impl WorkloadConfig {
    /// Settling delay as a duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Kill timeout as a duration
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// Device inventory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Where free devices are discovered
    pub source: InventorySourceKind,
    /// Interval between periodic refreshes in seconds
    pub refresh_interval_secs: u64,
    /// A device is free only below this GPU utilization (percent)
    pub max_gpu_utilization: f64,
    /// A device is free only below this memory utilization (percent)
    pub max_memory_utilization: f64,
    /// Devices reported by the static source
    pub static_devices: Vec<u32>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            source: InventorySourceKind::NvidiaSmi,
            refresh_interval_secs: 3600,
            max_gpu_utilization: 1.0,
            max_memory_utilization: 1.0,
            static_devices: Vec::new(),
        }
    }
}

impl InventoryConfig {
    /// Refresh interval as a duration
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Devices for the static source
    pub fn static_device_set(&self) -> DeviceSet {
        device_set(self.static_devices.iter().copied())
    }
}

/// Inventory source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InventorySourceKind {
    /// Query `nvidia-smi`
    NvidiaSmi,
    /// Query NVML directly
    Nvml,
    /// Fixed device list
    Static,
}

impl std::fmt::Display for InventorySourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventorySourceKind::NvidiaSmi => write!(f, "nvidia-smi"),
            InventorySourceKind::Nvml => write!(f, "nvml"),
            InventorySourceKind::Static => write!(f, "static"),
        }
    }
}

impl std::str::FromStr for InventorySourceKind {
    type Err = crate::GpuYieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nvidia-smi" | "nvidiasmi" | "smi" => Ok(InventorySourceKind::NvidiaSmi),
            "nvml" => Ok(InventorySourceKind::Nvml),
            "static" => Ok(InventorySourceKind::Static),
            other => Err(crate::GpuYieldError::Config(format!(
                "unknown inventory source '{}'",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::GpuYieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(crate::GpuYieldError::Config(format!(
                "unknown log format '{}'",
                other
            ))),
        }
    }
}
