//! Error types for process event streams.

use crate::subscriptions::SubscriptionId;
use crate::types::{EventType, Pid};
use thiserror::Error;

/// Main error type for stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Process not found: {0}")]
    ProcessNotFound(Pid),

    #[error("Process already registered: {0}")]
    ProcessExists(Pid),

    #[error("Process {0} has exited, {1} events are no longer accepted")]
    ProcessExited(Pid, EventType),

    #[error("Subscription not found: {0:?}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Invalid cursor: {0:?}")]
    InvalidCursor(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Serialization(e.to_string())
    }
}

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;
