//! gpuyield-runtime: Workload launcher
//!
//! This crate starts and stops the managed workload:
//! - The `Launcher` trait used by the allocation controller
//! - A process-based launcher that pins the workload to devices via its environment

pub mod process;
pub mod traits;

pub use process::{ProcessLauncher, ProcessLauncherConfig};
pub use traits::Launcher;
