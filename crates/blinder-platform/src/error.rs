//! Error types for blinder-platform
//!
//! Re-exports bridge errors from blinder-engine and adds platform-specific errors.

use std::sync::Arc;

use thiserror::Error;

// Re-export bridge error types
pub use blinder_engine::{BridgeError, BridgeResult};

/// Result type alias for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors that can occur during platform operations
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Engine value or session error
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Filter engine construction failed; every requester sees the same cause
    #[error("Filter engine construction failed: {0}")]
    SubsystemConstruction(#[source] Arc<PlatformError>),

    /// The script factory did not complete in time
    #[error("Filter engine construction timed out after {0}ms")]
    ConstructionTimeout(u64),

    /// The script factory reported an error or an unusable result
    #[error("Filter engine factory error: {0}")]
    Factory(String),

    /// A bootstrap resource could not be found
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Work was refused because the executor is stopped
    #[error("Executor has been stopped")]
    ExecutorStopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlatformError {
    /// Create a factory error
    pub fn factory(message: impl Into<String>) -> Self {
        Self::Factory(message.into())
    }

    /// Innermost cause of a construction failure
    pub fn root_cause(&self) -> &PlatformError {
        match self {
            Self::SubsystemConstruction(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Check if the failure originated in script
    pub fn is_script_error(&self) -> bool {
        match self.root_cause() {
            Self::Bridge(error) => error.is_script_error(),
            Self::Factory(_) => true,
            _ => false,
        }
    }
}
