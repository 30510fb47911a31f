//! Error handling module
//!
//! Provides the unified error type for the engine. Analysis entry points are
//! total - unparseable SQL degrades to the fallback classifier and is
//! reported as a warning string, never as an error. These variants cover the
//! few places where a caller contract is actually violated.

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown enhancement module: {0}")]
    UnknownModule(String),

    #[error("Enhancement module '{id}' failed: {message}")]
    ModuleFailed { id: String, message: String },

    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Helper function to create a module failure error
pub fn module_error(id: impl Into<String>, message: impl Into<String>) -> EngineError {
    EngineError::ModuleFailed {
        id: id.into(),
        message: message.into(),
    }
}
