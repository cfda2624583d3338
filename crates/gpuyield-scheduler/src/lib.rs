//! gpuyield-scheduler: Device inventory and allocation controller
//!
//! This crate decides where the managed workload runs:
//! - Free-device inventory sources and the inventory cache
//! - The allocation controller state machine
//! - Periodic inventory refresh

pub mod controller;
pub mod inventory;
pub mod nvidia_smi;
#[cfg(feature = "nvml")]
pub mod nvml;
pub mod refresher;

pub use controller::{AllocationController, ControllerConfig};
pub use inventory::{InventoryCache, InventorySource, StaticInventory, UtilizationThresholds};
pub use nvidia_smi::NvidiaSmiInventory;
#[cfg(feature = "nvml")]
pub use nvml::NvmlInventory;
pub use refresher::InventoryRefresher;
