//! Line framing over the worker's standard streams.
//!
//! Outgoing commands are written one per line. Incoming bytes are split on
//! `\n` (a trailing `\r` is dropped) and every line is handed to the
//! [`CorrelationQueue`] in arrival order. Bytes that are not valid UTF-8 are
//! replaced, never treated as a stream failure.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::TransportError;
use crate::mux::CorrelationQueue;

/// Boxed write half, so tests can substitute an in-memory pipe.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes newline-terminated command lines.
pub struct LineWriter {
    inner: BoxedWriter,
}

impl LineWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Writes `line` followed by `\n` and flushes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the stream is closed.
    pub async fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        self.inner.write_all(framed.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter").finish_non_exhaustive()
    }
}

/// Spawns the task that decodes `reader` into lines and feeds `queue`.
///
/// The queue is closed when the stream ends or fails, which is what turns a
/// dead worker into `WorkerUnavailable` for every waiting caller.
pub fn spawn_line_reader<R>(reader: R, queue: Arc<CorrelationQueue>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        info!("worker stdout reader task started");

        let reason = loop {
            match read_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    // Safely truncate for logging, respecting Unicode char boundaries
                    let display_line: String = line.chars().take(200).collect();
                    debug!(line = %display_line, "received from worker");
                    queue.deliver(line);
                }
                Ok(None) => break "worker output closed".to_string(),
                Err(e) => {
                    warn!(error = %e, "failed to read worker output");
                    break format!("failed to read worker output: {e}");
                }
            }
        };

        queue.close(reason);
        info!("worker stdout reader task ended");
    })
}

/// Spawns the task that forwards worker stderr into the log. The task
/// yields the number of non-blank lines it forwarded.
pub fn spawn_stderr_drain<R>(stderr: R) -> JoinHandle<usize>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        let mut forwarded = 0;

        while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf).await {
            if !line.trim().is_empty() {
                warn!("worker stderr: {}", line);
                forwarded += 1;
            }
        }
        debug!(lines = forwarded, "worker stderr reader task ended");
        forwarded
    })
}

/// Reads one line without its `\n` or `\r\n` terminator. `Ok(None)` at end
/// of stream.
async fn read_line_lossy<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }

    let line = match std::str::from_utf8(buf) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!(error = %e, "worker emitted invalid UTF-8, replacing bad bytes");
            String::from_utf8_lossy(buf).into_owned()
        }
    };
    Ok(Some(line))
}
