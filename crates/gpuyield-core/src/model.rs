//! Managed process, controller state and claim outcome definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gpu::{display_devices, Claim, DeviceSet};

/// The managed workload process and the devices it is bound to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Unique identifier for this launch
    pub launch_id: Uuid,
    /// Process ID, when the OS reported one
    pub pid: Option<u32>,
    /// Command line the process was started with
    pub command: String,
    /// Devices the process is pinned to
    pub devices: DeviceSet,
    /// Launch timestamp
    pub started_at: DateTime<Utc>,
}

impl ProcessHandle {
    /// Create a handle for a new launch
    pub fn new(command: String, devices: DeviceSet) -> Self {
        Self {
            launch_id: Uuid::new_v4(),
            pid: None,
            command,
            devices,
            started_at: Utc::now(),
        }
    }

    /// Whether the process holds any of the claimed devices
    pub fn conflicts_with(&self, claim: &Claim) -> bool {
        claim.overlaps(&self.devices)
    }
}

/// The controller's assignment: no process, or exactly one process
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ControllerState {
    /// No process is running and no devices are held
    #[default]
    Idle,
    /// A process is bound to a non-empty device set
    Running(ProcessHandle),
}

impl ControllerState {
    /// Current phase of the state machine
    pub fn phase(&self) -> ControllerPhase {
        match self {
            ControllerState::Idle => ControllerPhase::Idle,
            ControllerState::Running(_) => ControllerPhase::Running,
        }
    }

    /// The managed process, if any
    pub fn handle(&self) -> Option<&ProcessHandle> {
        match self {
            ControllerState::Idle => None,
            ControllerState::Running(handle) => Some(handle),
        }
    }

    /// Devices currently held by the managed process
    pub fn devices(&self) -> DeviceSet {
        self.handle()
            .map(|h| h.devices.clone())
            .unwrap_or_default()
    }
}

/// Phase of the allocation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerPhase {
    /// No process running
    Idle,
    /// Process running on a device set
    Running,
    /// Process is being killed to vacate claimed devices
    Preempting,
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerPhase::Idle => write!(f, "Idle"),
            ControllerPhase::Running => write!(f, "Running"),
            ControllerPhase::Preempting => write!(f, "Preempting"),
        }
    }
}

/// Result of handling a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A process runs on `devices` after the claim
    Launched { devices: DeviceSet, preempted: bool },
    /// Nothing is left for the workload; the controller is idle
    NoDevicesAvailable { preempted: bool },
    /// The claim was empty and nothing changed
    Unchanged { devices: Option<DeviceSet> },
}

impl ClaimOutcome {
    /// Whether the previous process was killed to vacate claimed devices
    pub fn preempted(&self) -> bool {
        match self {
            ClaimOutcome::Launched { preempted, .. } => *preempted,
            ClaimOutcome::NoDevicesAvailable { preempted } => *preempted,
            ClaimOutcome::Unchanged { .. } => false,
        }
    }

    /// Human-readable description returned to the claimant
    pub fn message(&self) -> String {
        match self {
            ClaimOutcome::Launched { devices, .. } => {
                format!("Use currently available GPUs: {}", display_devices(devices))
            }
            ClaimOutcome::NoDevicesAvailable { .. } => {
                "No available GPUs - process will not be started".to_string()
            }
            ClaimOutcome::Unchanged {
                devices: Some(devices),
            } => format!("Empty claim, keeping current GPUs: {}", display_devices(devices)),
            ClaimOutcome::Unchanged { devices: None } => {
                "Empty claim, no process running".to_string()
            }
        }
    }
}

/// Snapshot of the controller for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Current phase
    pub phase: ControllerPhase,
    /// The managed process, if any
    pub process: Option<ProcessHandle>,
    /// Whether the managed process is still alive
    pub alive: bool,
    /// Cached free devices
    pub free_devices: DeviceSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::device_set;

    #[test]
    fn test_process_handle_new() {
        let handle = ProcessHandle::new("train.sh".to_string(), device_set([0, 1]));
        assert_eq!(handle.command, "train.sh");
        assert_eq!(handle.devices, device_set([0, 1]));
        assert!(handle.pid.is_none());
    }

    #[test]
    fn test_process_handle_conflicts() {
        let handle = ProcessHandle::new("train.sh".to_string(), device_set([0, 1]));
        assert!(handle.conflicts_with(&Claim::new(device_set([1]))));
        assert!(!handle.conflicts_with(&Claim::new(device_set([5]))));
        assert!(!handle.conflicts_with(&Claim::default()));
    }

    #[test]
    fn test_controller_state_devices() {
        assert_eq!(ControllerState::Idle.devices(), DeviceSet::new());
        assert_eq!(ControllerState::Idle.phase(), ControllerPhase::Idle);

        let handle = ProcessHandle::new("train.sh".to_string(), device_set([2]));
        let state = ControllerState::Running(handle);
        assert_eq!(state.devices(), device_set([2]));
        assert_eq!(state.phase(), ControllerPhase::Running);
    }

    #[test]
    fn test_claim_outcome_messages() {
        let launched = ClaimOutcome::Launched {
            devices: device_set([0, 3]),
            preempted: true,
        };
        assert_eq!(launched.message(), "Use currently available GPUs: [0, 3]");
        assert!(launched.preempted());

        let none = ClaimOutcome::NoDevicesAvailable { preempted: false };
        assert_eq!(none.message(), "No available GPUs - process will not be started");

        let unchanged = ClaimOutcome::Unchanged { devices: None };
        assert_eq!(unchanged.message(), "Empty claim, no process running");
        assert!(!unchanged.preempted());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&ControllerPhase::Preempting).unwrap(),
            "\"preempting\""
        );
        assert_eq!(ControllerPhase::Running.to_string(), "Running");
    }
}
