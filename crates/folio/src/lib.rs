//! Folio: a web front for the Bookstore backend process.
//!
//! Many concurrent HTTP requests share one line-oriented stdin/stdout channel
//! to a single backend process. [`mux`] keeps every reply correlated with the
//! command that asked for it; [`worker`] owns the process; [`session`] tracks
//! who is logged in; [`store`] and [`api`] expose the bookstore operations.

pub mod api;
pub mod mux;
pub mod session;
pub mod settings;
pub mod store;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use mux::{CommandChannel, ExchangeConfig, ExchangeCoordinator, ExchangeError};
pub use session::{SessionSnapshot, SessionState};
pub use store::{BookstoreService, StoreError};
pub use worker::{WorkerConfig, WorkerError, WorkerHandle, WorkerStatus};
