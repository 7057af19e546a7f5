//! Errors raised by the execution core
//!
//! Failures of the untrusted code are never errors: they come back as
//! `ActionResult` values. Everything here is a fault of the caller or of the
//! core's own infrastructure and is propagated.

use std::fmt;
use thiserror::Error;

/// Broad classification used by callers to decide how loudly to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller bug: bad descriptor, unknown mode
    Configuration,
    /// Environment creation, install or remote channel failure
    Setup,
    /// The remote target or payload returned something unusable
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Setup => "setup_error",
            ErrorKind::Validation => "validation_error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Unknown execution_mode: {0}")]
    UnknownExecutionMode(String),

    #[error("Only atomic actions supported (got action_type '{0}')")]
    NotAtomic(String),

    #[error("{0}")]
    Setup(String),

    #[error("Could not determine OS of remote target '{target}': {fingerprint}")]
    UnknownOs { target: String, fingerprint: String },

    #[error("Remote payload failed with exit code {code}: {stderr}")]
    RemoteFailure { code: i32, stderr: String },

    #[error("Remote payload returned zero data bytes")]
    EmptyOutput,

    #[error("Remote payload output is not valid {format} format")]
    InvalidFormat { format: String },

    #[error("Failed to serialize input data: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ExecutorError {
    pub fn setup(message: impl Into<String>) -> Self {
        ExecutorError::Setup(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::UnknownExecutionMode(_)
            | ExecutorError::NotAtomic(_)
            | ExecutorError::Serialization(_) => ErrorKind::Configuration,
            ExecutorError::Setup(_) => ErrorKind::Setup,
            ExecutorError::UnknownOs { .. }
            | ExecutorError::RemoteFailure { .. }
            | ExecutorError::EmptyOutput
            | ExecutorError::InvalidFormat { .. } => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
