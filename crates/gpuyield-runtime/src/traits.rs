//! Launcher trait definitions

use async_trait::async_trait;
use gpuyield_core::{DeviceSet, GpuYieldResult, ProcessHandle};

/// Starts and stops the managed workload
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch `command` so that it only sees `devices`
    async fn start(&self, command: &str, devices: &DeviceSet) -> GpuYieldResult<ProcessHandle>;

    /// Forcefully stop a launched process and wait for it to be reaped
    async fn stop(&self, handle: &ProcessHandle) -> GpuYieldResult<()>;

    /// Check if a launched process is still alive
    async fn is_running(&self, handle: &ProcessHandle) -> GpuYieldResult<bool>;

    /// Get the launcher name
    fn name(&self) -> &'static str;
}
