//! Command/reply multiplexing over the single worker channel.

mod channel;
mod error;
mod exchange;
mod queue;

pub use channel::CommandChannel;
pub use error::ExchangeError;
pub use exchange::{ExchangeConfig, ExchangeCoordinator};
pub use queue::{CorrelationQueue, NextLine, QueueClosed};
