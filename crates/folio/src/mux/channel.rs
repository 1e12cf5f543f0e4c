//! The port callers use to talk to the worker.

use async_trait::async_trait;
use folio_protocol::{Reply, ReplyShape};

use super::error::ExchangeError;

/// One command in, one assembled reply out.
///
/// Implementations guarantee that exchanges never interleave: the lines of a
/// reply all belong to the command that was written for it. The process-backed
/// implementation is [`ExchangeCoordinator`](super::ExchangeCoordinator);
/// tests substitute scripted ones.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Writes `command` and reads the reply described by `shape`.
    async fn exchange(&self, command: &str, shape: ReplyShape) -> Result<Reply, ExchangeError>;
}
