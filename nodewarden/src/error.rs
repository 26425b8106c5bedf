//! Sidecar error types

use thiserror::Error;

/// Errors that can occur while coordinating the local node's cluster lifecycle
#[derive(Error, Debug)]
pub enum WardenError {
    /// The target node has no cluster configuration yet. Distinguished from
    /// other failures because it drives node initialization rather than a
    /// retry.
    #[error("node uninitialized")]
    Uninitialized,

    #[error("authentication failed for {0}: credentials rejected after retry")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} from {path}: {body}")]
    UnexpectedStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("invalid response: {0}")]
    Validation(String),

    #[error("node removal failed: {0}")]
    Removal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl WardenError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            WardenError::Uninitialized => "uninitialized",
            WardenError::Auth(_) => "auth",
            WardenError::Transport(_) => "transport",
            WardenError::UnexpectedStatus { .. } => "unexpected_status",
            WardenError::Validation(_) => "validation",
            WardenError::Removal(_) => "removal",
            WardenError::Config(_) => "config",
        }
    }

    /// True for the explicit "no cluster yet" signal
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, WardenError::Uninitialized)
    }
}

impl From<reqwest::Error> for WardenError {
    fn from(err: reqwest::Error) -> Self {
        WardenError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
