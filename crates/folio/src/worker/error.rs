//! Error types for the worker process and its stdio transport.

use std::io;

use thiserror::Error;

/// Errors raised while starting the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker binary was not found.
    #[error("worker binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {message}")]
    SpawnFailed {
        /// Description of the spawn failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The spawned process came without one of its piped streams.
    #[error("worker process has no {0}")]
    MissingPipe(&'static str),
}

/// Transport-layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
