//! gpuyield-api: HTTP control surface for gpuyield
//!
//! This crate exposes the allocation controller over HTTP:
//! - Claiming GPUs for another actor
//! - Listing free GPUs
//! - Controller status and health

pub mod rest;

pub use rest::create_router;
