//! Errors raised by an exchange.

use std::time::Duration;

use thiserror::Error;

use crate::worker::TransportError;

/// Why an exchange did not produce a reply.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The worker answered with something the grammar does not allow.
    #[error("protocol error after `{verb}`: {detail}")]
    Protocol { verb: String, detail: String },

    /// No reply line arrived within the bound.
    #[error("worker did not answer `{verb}` within {}ms", .timeout.as_millis())]
    Timeout { verb: String, timeout: Duration },

    /// The worker process is gone. Terminal.
    #[error("worker unavailable: {reason}")]
    Unavailable { reason: String },

    /// Writing the command failed while the worker still looked alive.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ExchangeError {
    pub fn protocol(verb: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            verb: verb.into(),
            detail: detail.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}
