//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for lifecycle events.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid options or configuration values.
    #[error("validation error: {0}")]
    Validation(String),

    /// Lifecycle transition not allowed from the current state.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Operation that must run on the dispatch thread was called elsewhere.
    #[error("wrong thread: {0}")]
    WrongThread(String),

    /// The dispatch queue no longer accepts tasks.
    #[error("dispatch queue closed: {0}")]
    DispatchClosed(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn wrong_thread(msg: impl Into<String>) -> Self {
        Self::WrongThread(msg.into())
    }

    pub fn dispatch_closed(msg: impl Into<String>) -> Self {
        Self::DispatchClosed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
