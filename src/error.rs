//! Custom error types for drover.
//!
//! These cover failures of the tool itself (bad config, missing agent
//! binary, I/O). Failures of the *agent* are not errors here: they are
//! classified into [`crate::outcome::ErrorKind`] and handled by the
//! recovery state machine.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for drover operations.
#[derive(Error, Debug)]
pub enum DroverError {
    /// Failed to load configuration.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Agent binary is not installed or not on PATH.
    #[error("Agent binary not found: {binary}")]
    AgentNotFound { binary: String },

    /// Agent process could not be spawned or managed.
    #[error("Agent process error: {message}")]
    AgentProcess { message: String },

    /// No valid task numbers after range expansion.
    #[error("No valid task numbers in: {input}")]
    EmptyTaskList { input: String },

    /// Git operation failed.
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    /// Session log could not be written.
    #[error("Session log error: {message}")]
    SessionLog { message: String },

    /// IO error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DroverError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with the offending path.
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an agent process error.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::AgentProcess {
            message: message.into(),
        }
    }

    /// Create a git error.
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// Pipeline outcomes use 0/1 (see [`crate::pipeline`]); tool errors get
    /// distinct codes so wrapping scripts can tell them apart.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::AgentNotFound { .. } => 6,
            Self::EmptyTaskList { .. } => 2,
            _ => 1,
        }
    }
}

/// Type alias for drover results.
pub type Result<T> = std::result::Result<T, DroverError>;
