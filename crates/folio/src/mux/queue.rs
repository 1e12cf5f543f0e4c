//! FIFO rendezvous between decoded reply lines and the callers owed them.
//!
//! One producer (the line reader) calls [`CorrelationQueue::deliver`]; any
//! number of consumers call [`CorrelationQueue::next_line`]. Lines carry no
//! correlation id, so position is the only identity: the k-th line delivered
//! resolves the k-th wait still outstanding. Whichever side arrives first is
//! buffered, which means the line buffer and the wait list are never both
//! non-empty.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// The queue was closed and holds no more lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("correlation queue closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
struct QueueState {
    lines: VecDeque<String>,
    waiters: VecDeque<oneshot::Sender<String>>,
    closed: Option<String>,
}

/// Strict FIFO matching of reply lines to waiters.
#[derive(Debug, Default)]
pub struct CorrelationQueue {
    state: Mutex<QueueState>,
}

impl CorrelationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // No await happens under this lock, so a poisoned guard still holds a
        // consistent queue.
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Claims the next line.
    ///
    /// The claim is registered when this method is called, not when the
    /// returned future is first polled, so call order alone fixes FIFO
    /// position. Dropping the future forfeits the claim; the line it would
    /// have received goes to the next waiter instead.
    pub fn next_line(&self) -> NextLine {
        let mut state = self.state();

        if let Some(line) = state.lines.pop_front() {
            return NextLine::ready(Ok(line));
        }
        if state.closed.is_some() {
            return NextLine::ready(Err(QueueClosed));
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        NextLine {
            state: NextLineState::Waiting(rx),
        }
    }

    /// Hands a line to the oldest live waiter, or buffers it.
    pub fn deliver(&self, line: String) {
        let mut state = self.state();
        if state.closed.is_some() {
            debug!(line = %line, "dropping line delivered after close");
            return;
        }

        let mut line = line;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(line) {
                Ok(()) => return,
                // The waiter gave up; offer the line to the next one.
                Err(returned) => line = returned,
            }
        }
        state.lines.push_back(line);
    }

    /// Closes the queue. Every pending waiter resolves with [`QueueClosed`];
    /// lines already buffered can still be claimed.
    pub fn close(&self, reason: impl Into<String>) {
        let mut state = self.state();
        if state.closed.is_none() {
            state.closed = Some(reason.into());
        }
        // Dropping the senders wakes the receivers with an error.
        state.waiters.clear();
    }

    /// Why the queue was closed, if it was.
    pub fn close_reason(&self) -> Option<String> {
        self.state().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed.is_some()
    }

    /// Removes and returns every buffered line.
    pub fn discard_buffered(&self) -> Vec<String> {
        self.state().lines.drain(..).collect()
    }

    /// Drops waiters whose callers stopped listening.
    pub fn prune_cancelled(&self) {
        self.state().waiters.retain(|waiter| !waiter.is_closed());
    }

    /// Waiters still registered, including ones not yet pruned.
    pub fn pending_waiters(&self) -> usize {
        self.state().waiters.len()
    }

    pub fn buffered_len(&self) -> usize {
        self.state().lines.len()
    }
}

enum NextLineState {
    Ready(Option<Result<String, QueueClosed>>),
    Waiting(oneshot::Receiver<String>),
}

/// A registered claim on the next reply line.
pub struct NextLine {
    state: NextLineState,
}

impl NextLine {
    fn ready(result: Result<String, QueueClosed>) -> Self {
        Self {
            state: NextLineState::Ready(Some(result)),
        }
    }
}

impl Future for NextLine {
    type Output = Result<String, QueueClosed>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            NextLineState::Ready(slot) => Poll::Ready(slot.take().unwrap_or(Err(QueueClosed))),
            NextLineState::Waiting(rx) => Pin::new(rx).poll(cx).map(|res| res.map_err(|_| QueueClosed)),
        }
    }
}

impl std::fmt::Debug for NextLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            NextLineState::Ready(_) => "ready",
            NextLineState::Waiting(_) => "waiting",
        };
        f.debug_struct("NextLine").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_line_is_returned_immediately() {
        let queue = CorrelationQueue::new();
        queue.deliver("first".to_string());
        queue.deliver("second".to_string());

        assert_eq!(queue.next_line().await, Ok("first".to_string()));
        assert_eq!(queue.next_line().await, Ok("second".to_string()));
        assert_eq!(queue.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_waiters_resolve_in_call_order() {
        let queue = CorrelationQueue::new();
        let first = queue.next_line();
        let second = queue.next_line();
        let third = queue.next_line();
        assert_eq!(queue.pending_waiters(), 3);

        queue.deliver("a".to_string());
        queue.deliver("b".to_string());
        queue.deliver("c".to_string());

        // Await out of order; correlation is by registration, not by polling.
        assert_eq!(third.await, Ok("c".to_string()));
        assert_eq!(first.await, Ok("a".to_string()));
        assert_eq!(second.await, Ok("b".to_string()));
    }

    #[tokio::test]
    async fn test_buffer_and_waiters_never_both_non_empty() {
        let queue = CorrelationQueue::new();
        let pending = queue.next_line();
        queue.deliver("x".to_string());
        assert_eq!(queue.pending_waiters(), 0);
        assert_eq!(queue.buffered_len(), 0);
        assert_eq!(pending.await, Ok("x".to_string()));

        queue.deliver("y".to_string());
        assert_eq!(queue.pending_waiters(), 0);
        assert_eq!(queue.buffered_len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let queue = CorrelationQueue::new();
        let abandoned = queue.next_line();
        let kept = queue.next_line();
        drop(abandoned);

        queue.deliver("only".to_string());
        assert_eq!(kept.await, Ok("only".to_string()));
        assert_eq!(queue.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_waiter_does_not_swallow_next_line() {
        let queue = CorrelationQueue::new();
        let res = tokio::time::timeout(Duration::from_millis(10), queue.next_line()).await;
        assert!(res.is_err());

        queue.prune_cancelled();
        assert_eq!(queue.pending_waiters(), 0);

        queue.deliver("late".to_string());
        assert_eq!(queue.buffered_len(), 1);
        assert_eq!(queue.discard_buffered(), vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_waiters() {
        let queue = Arc::new(CorrelationQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next_line().await })
        };
        tokio::task::yield_now().await;

        queue.close("worker exited");
        assert_eq!(waiter.await.unwrap(), Err(QueueClosed));
        assert_eq!(queue.close_reason().as_deref(), Some("worker exited"));
        assert_eq!(queue.next_line().await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_buffered_lines_survive_close() {
        let queue = CorrelationQueue::new();
        queue.deliver("last words".to_string());
        queue.close("eof");
        queue.deliver("ignored".to_string());

        assert_eq!(queue.next_line().await, Ok("last words".to_string()));
        assert_eq!(queue.next_line().await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_first_close_reason_wins() {
        let queue = CorrelationQueue::new();
        queue.close("output closed");
        queue.close("process exited");
        assert_eq!(queue.close_reason().as_deref(), Some("output closed"));
        assert!(queue.is_closed());
    }
}
