//! Process-based launcher implementation
//!
//! The workload runs as a child process of the daemon. Device visibility is
//! passed through a single environment variable that is written once at
//! launch and never changed afterwards.

use async_trait::async_trait;
use gpuyield_core::{
    visible_devices_value, DeviceSet, GpuYieldError, GpuYieldResult, ProcessHandle,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::traits::Launcher;

/// Process launcher configuration
#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    /// Shell used to interpret the workload command line
    pub shell: PathBuf,
    /// Environment variable restricting visible devices
    pub visible_devices_env: String,
    /// Upper bound on waiting for a killed process to exit
    pub kill_timeout: Duration,
}

impl Default for ProcessLauncherConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            visible_devices_env: "CUDA_VISIBLE_DEVICES".to_string(),
            kill_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(unix)]
fn default_shell() -> PathBuf {
    PathBuf::from("sh")
}

#[cfg(windows)]
fn default_shell() -> PathBuf {
    PathBuf::from("cmd")
}

/// Launcher that runs the workload as a child process
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
    /// Children spawned by this launcher, keyed by launch id
    children: Mutex<HashMap<Uuid, Child>>,
}

impl ProcessLauncher {
    /// Create a new process launcher
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Build the command to start the workload
    fn build_command(&self, command: &str, devices: &DeviceSet) -> Command {
        let mut cmd = Command::new(&self.config.shell);

        #[cfg(unix)]
        {
            cmd.arg("-c").arg(command);
            // Own process group, so a kill reaches everything the shell started
            cmd.process_group(0);
        }

        #[cfg(windows)]
        {
            cmd.arg("/C").arg(command);
        }

        cmd.env(&self.config.visible_devices_env, visible_devices_value(devices));

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        cmd
    }

    /// Send SIGKILL to the whole process group led by `pid`
    #[cfg(unix)]
    fn kill_process_group(pid: u32) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            warn!(pid = pid, "Process id out of range, not signalling its group");
            return;
        };

        match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => debug!(pid = pid, "Sent SIGKILL to process group"),
            // Whole group already gone
            Err(Errno::ESRCH) => debug!(pid = pid, "Process group already exited"),
            Err(e) => warn!(pid = pid, error = %e, "Failed to kill process group"),
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn start(&self, command: &str, devices: &DeviceSet) -> GpuYieldResult<ProcessHandle> {
        info!(
            command = %command,
            devices = %visible_devices_value(devices),
            "Starting workload process"
        );

        let mut cmd = self.build_command(command, devices);

        match cmd.spawn() {
            Ok(child) => {
                let mut handle = ProcessHandle::new(command.to_string(), devices.clone());
                handle.pid = child.id();

                debug!(
                    launch_id = %handle.launch_id,
                    pid = ?handle.pid,
                    "Workload process spawned"
                );

                self.children.lock().await.insert(handle.launch_id, child);
                Ok(handle)
            }
            Err(e) => {
                error!(
                    command = %command,
                    error = %e,
                    "Failed to spawn workload process"
                );
                Err(GpuYieldError::Launch(format!(
                    "Failed to spawn '{}': {}",
                    command, e
                )))
            }
        }
    }

    async fn stop(&self, handle: &ProcessHandle) -> GpuYieldResult<()> {
        let child = self.children.lock().await.remove(&handle.launch_id);
        let Some(mut child) = child else {
            return Err(GpuYieldError::Runtime(format!(
                "No process tracked for launch {}",
                handle.launch_id
            )));
        };

        info!(
            launch_id = %handle.launch_id,
            pid = ?handle.pid,
            "Killing workload process"
        );

        #[cfg(unix)]
        {
            if let Some(pid) = handle.pid {
                Self::kill_process_group(pid);
            }
        }

        if let Err(e) = child.start_kill() {
            // Already exited; waiting below only reaps it
            debug!(launch_id = %handle.launch_id, error = %e, "Kill signal not delivered");
        }

        match tokio::time::timeout(self.config.kill_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    launch_id = %handle.launch_id,
                    status = %status,
                    "Workload process exited"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(GpuYieldError::Runtime(format!(
                "Failed to wait for process {:?}: {}",
                handle.pid, e
            ))),
            Err(_) => {
                warn!(
                    launch_id = %handle.launch_id,
                    pid = ?handle.pid,
                    timeout_secs = self.config.kill_timeout.as_secs(),
                    "Workload process did not exit after kill"
                );
                Err(GpuYieldError::PreemptionTimeout(format!(
                    "process {:?} still running after {:?}",
                    handle.pid, self.config.kill_timeout
                )))
            }
        }
    }

    async fn is_running(&self, handle: &ProcessHandle) -> GpuYieldResult<bool> {
        let mut children = self.children.lock().await;
        match children.get_mut(&handle.launch_id) {
            Some(child) => Ok(child.try_wait()?.is_none()),
            None => Ok(false),
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}
