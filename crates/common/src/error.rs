//! Error types for the mock backend

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the mock backend Error
pub type Result<T> = std::result::Result<T, Error>;

/// Mock backend error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to bind {host}:{port}: {message}")]
    Bind {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Invalid state: cannot {operation} a server that is {state}")]
    InvalidState { state: String, operation: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("No captured request is queued")]
    EmptyQueue,

    #[error("Capture channel closed")]
    ChannelClosed,

    #[error("No captured request arrived within {0:?}")]
    CaptureTimeout(Duration),

    #[error("Failed to spawn worker {path}: {source}")]
    WorkerSpawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker exited before reporting readiness")]
    WorkerExited,

    #[error("Worker did not report readiness within {0:?}")]
    StartupTimeout(Duration),

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True for failures confined to a single request; the server keeps serving.
    pub fn is_per_request(&self) -> bool {
        matches!(self, Error::MalformedPayload(_))
    }
}
