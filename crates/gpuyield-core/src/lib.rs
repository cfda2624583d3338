//! gpuyield-core: Core types for the gpuyield controller
//!
//! This crate provides the fundamental types used throughout gpuyield:
//! - Device identifiers, device sets and claims
//! - Managed process handles and controller state
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;
pub mod model;

pub use config::*;
pub use error::*;
pub use gpu::*;
pub use model::*;
