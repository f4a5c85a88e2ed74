//! Error types for bridge operations
//!
//! Shape errors are raised before any engine work happens. Script errors are
//! captured at the evaluation and call boundary and carried as structured data,
//! including the script-side stack when one exists.

use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Structured error types for engine value and session operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The operation was invoked on a value of the wrong shape
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Coercion to a primitive raised inside the engine
    #[error("Conversion error: cannot convert to {target}: {message}")]
    Conversion {
        target: &'static str,
        message: String,
    },

    /// Source failed to parse
    #[error("Syntax error{}: {message}", format_file(file))]
    SyntaxError {
        message: String,
        file: Option<String>,
    },

    /// Script raised while evaluating or while running a called function
    #[error("{error_type}: {message}")]
    ScriptExecution {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// The owning session has been disposed
    #[error("Script engine has been disposed")]
    EngineGone,

    /// The handle slot is no longer registered with its session
    #[error("Value handle {0} is no longer registered")]
    StaleHandle(u64),

    /// Engine-internal failure (allocation, runtime creation)
    #[error("Engine error: {0}")]
    Engine(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_file(file: &Option<String>) -> String {
    match file {
        Some(file) => format!(" in {file}"),
        None => String::new(),
    }
}

impl BridgeError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptExecution {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a conversion error
    pub fn conversion(target: &'static str, message: impl Into<String>) -> Self {
        Self::Conversion {
            target,
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a user-facing script error
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::ScriptExecution { .. } | Self::SyntaxError { .. })
    }

    /// Check if the failure means the engine is no longer usable
    pub fn is_engine_gone(&self) -> bool {
        matches!(self, Self::EngineGone)
    }

    /// Get the stack trace if available
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::ScriptExecution { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Get the script-side error type (e.g., "TypeError", "SyntaxError")
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::ScriptExecution { error_type, .. } => Some(error_type),
            Self::SyntaxError { .. } => Some("SyntaxError"),
            _ => None,
        }
    }
}

impl From<rquickjs::Error> for BridgeError {
    fn from(error: rquickjs::Error) -> Self {
        Self::Engine(error.to_string())
    }
}
