//! Error types for the analysis-completion notifier.
//!
//! Library-facing failures use `thiserror` enums; collaborator glue
//! (history HTTP, settings files) stays on `anyhow`.

use thiserror::Error;

/// Inbound push payload could not be turned into a [`crate::Notification`].
#[derive(Error, Debug)]
pub enum ParseError {
    /// Payload is not valid JSON or does not match the record shape.
    #[error("malformed notification payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload has no `type` discriminator.
    #[error("notification payload has no `type` field")]
    MissingType,

    /// Payload carries a `type` this client does not handle.
    #[error("unsupported notification type: {0}")]
    UnsupportedType(String),
}

/// One-shot registration conflict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// A waiter for this task is still in flight.
    #[error("task {task_id} already has a pending completion callback")]
    AlreadyRegistered {
        /// Task identifier (project id) that is already claimed.
        task_id: String,
    },
}

/// Failure outcome of a completion wait.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No notification arrived before the deadline.
    #[error("analysis for task {task_id} did not complete within {timeout_ms}ms")]
    Timeout {
        /// Task that was waited on.
        task_id: String,
        /// Deadline that elapsed.
        timeout_ms: u64,
    },

    /// Another caller is already waiting on this task.
    #[error("task {task_id} already has a pending waiter")]
    AlreadyWaiting {
        /// Task that was waited on.
        task_id: String,
    },

    /// The registration was dropped before delivery (router cleared or cancelled).
    #[error("wait for task {task_id} was cancelled")]
    Cancelled {
        /// Task that was waited on.
        task_id: String,
    },
}

impl From<RegisterError> for WaitError {
    fn from(error: RegisterError) -> Self {
        match error {
            RegisterError::AlreadyRegistered { task_id } => Self::AlreadyWaiting { task_id },
        }
    }
}

/// Push channel transport failure.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Channel could not be established.
    #[error("push channel connect failed: {0}")]
    Connect(String),

    /// Established channel failed mid-stream.
    #[error("push channel stream error: {0}")]
    Stream(String),

    /// Peer closed the channel.
    #[error("push channel closed by peer")]
    Closed,
}
