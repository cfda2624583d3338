//! Error types for gpuyield

use thiserror::Error;

/// Main error type for gpuyield
#[derive(Error, Debug)]
pub enum GpuYieldError {
    /// The device inventory source could not be queried
    #[error("Inventory unavailable: {0}")]
    InventoryUnavailable(String),

    /// The managed workload could not be spawned
    #[error("Launch error: {0}")]
    Launch(String),

    /// A request was malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// The managed workload did not exit within the kill timeout
    #[error("Preemption timeout: {0}")]
    PreemptionTimeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for gpuyield operations
pub type GpuYieldResult<T> = Result<T, GpuYieldError>;

impl From<serde_json::Error> for GpuYieldError {
    fn from(err: serde_json::Error) -> Self {
        GpuYieldError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for GpuYieldError {
    fn from(err: toml::de::Error) -> Self {
        GpuYieldError::Config(err.to_string())
    }
}

impl GpuYieldError {
    /// Whether the error was caused by the caller rather than the controller
    pub fn is_client_error(&self) -> bool {
        matches!(self, GpuYieldError::Validation(_))
    }
}
