//! The bookstore backend process and its stdio line transport.

mod config;
mod error;
mod supervisor;
mod transport;

pub use config::WorkerConfig;
pub use error::{TransportError, WorkerError};
pub use supervisor::{WorkerHandle, WorkerStatus};
pub use transport::{BoxedWriter, LineWriter, spawn_line_reader, spawn_stderr_drain};
