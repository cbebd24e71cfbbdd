//! Error types for scene, geometry and acceleration structure operations.

use thiserror::Error;

/// Main error type for rtscene operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Device buffer or acceleration structure memory exhausted
    #[error("Allocation of {requested} bytes for '{label}' failed ({available} bytes available)")]
    AllocationFailure {
        label: String,
        requested: u64,
        available: u64,
    },

    /// Operation called while the object is not in a state that supports it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Instance refers to a geometry the scene does not own
    #[error("Invalid geometry reference: index {index} (generation {generation})")]
    InvalidReference { index: u32, generation: u32 },

    /// Acceleration structure construction or compaction failed
    #[error("Acceleration structure build failed: {0}")]
    BuildFailure(String),

    /// Intersection function name could not be resolved
    #[error("Unresolved intersection function: {0}")]
    UnresolvedFunction(String),

    /// Invalid settings value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a build failure error.
    pub fn build_failure(msg: impl Into<String>) -> Self {
        Self::BuildFailure(msg.into())
    }

    /// True for errors caused by running out of device memory.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, Self::AllocationFailure { .. })
    }
}

/// Result type alias for rtscene operations.
pub type Result<T> = std::result::Result<T, Error>;
