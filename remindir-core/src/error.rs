//! Error types for the remindir ecosystem.

use thiserror::Error;

/// Errors that can occur in remindir operations.
#[derive(Error, Debug)]
pub enum RemindError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("ICS parse error: {0}")]
    Parse(String),

    #[error("Recurrence rule error: {0}")]
    Recurrence(String),

    #[error("Event store inconsistency: {0}")]
    Store(String),

    #[error("Acknowledgment persistence error: {0}")]
    Persistence(String),

    #[error("Notification delivery error: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for remindir operations.
pub type RemindResult<T> = Result<T, RemindError>;
