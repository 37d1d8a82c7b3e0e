//! Errors raised by plugin implementations.
//!
//! The orchestrator never lets these escape a task: a failing plugin call inside a build or execution task is
//! recorded as a `-1` stage result with the error text as the stage log.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a compiler, test parser, coverage extractor, or coverage validator.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{plugin} does not support the `{operation}` operation")]
    UnsupportedOperation { plugin: String, operation: &'static str },

    #[error("context for '{}' was not produced by {plugin}", item.display())]
    ForeignContext { plugin: String, item: PathBuf },

    #[error("environment check failed: {0}")]
    Environment(String),

    #[error("{0}")]
    Message(String),
}

impl PluginError {
    /// Build a free-form plugin error.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
