//! Error types for workers and sessions.

use std::path::PathBuf;

/// Errors raised by a worker or its factory.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Worker thread panicked")]
    ThreadPanic,

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("No worker script at {location} (looked in {path})")]
    NotFound { location: String, path: PathBuf },

    #[error("Failed to load worker script: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of the session service.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Worker did not answer the {0} in time")]
    Timeout(&'static str),

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Worker closed its channel before replying")]
    Disconnected,

    #[error("Invalid worker message: {0}")]
    Protocol(#[from] serde_json::Error),
}
