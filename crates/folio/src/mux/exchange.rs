//! Serialized command/reply exchanges over the shared worker channel.
//!
//! The exchange lock owns the write half, so no command can reach the worker
//! while another exchange is still consuming its reply. An exchange that did
//! not finish cleanly (timeout, protocol error, caller dropped) records what
//! the worker still owes it; the next exchange discards exactly those lines
//! before writing, so a late reply is never handed to a later caller.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use folio_protocol::{INVALID_SENTINEL, Reply, ReplyError, ReplyShape, Row};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::channel::CommandChannel;
use super::error::ExchangeError;
use super::queue::CorrelationQueue;
use crate::worker::{LineWriter, TransportError, spawn_line_reader};

/// Timing bounds for exchanges.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// Upper bound on each awaited reply line.
    pub reply_timeout: Duration,
    /// How long the channel must stay quiet before a resync is complete.
    pub resync_grace: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_millis(5000),
            resync_grace: Duration::from_millis(200),
        }
    }
}

/// Reply lines the worker still owes an unfinished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owed {
    Nothing,
    Lines(usize),
    /// A count header, then that many rows.
    Header,
    /// The command may or may not have reached the worker, or its reply
    /// could not be framed.
    Unknown,
}

#[derive(Debug)]
struct ExchangeSlot {
    writer: LineWriter,
    owed: Owed,
}

/// Runs one exchange at a time against the worker.
#[derive(Debug)]
pub struct ExchangeCoordinator {
    slot: Mutex<ExchangeSlot>,
    queue: Arc<CorrelationQueue>,
    config: ExchangeConfig,
    sequence: AtomicU64,
}

impl ExchangeCoordinator {
    pub fn new(writer: LineWriter, queue: Arc<CorrelationQueue>, config: ExchangeConfig) -> Self {
        Self {
            slot: Mutex::new(ExchangeSlot {
                writer,
                owed: Owed::Nothing,
            }),
            queue,
            config,
            sequence: AtomicU64::new(0),
        }
    }

    /// Wires a coordinator to a pair of byte streams and starts the line
    /// reader feeding it.
    pub fn connect<R, W>(reader: R, writer: W, config: ExchangeConfig) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let queue = Arc::new(CorrelationQueue::new());
        let reader_task = spawn_line_reader(reader, Arc::clone(&queue));
        (Self::new(LineWriter::new(writer), queue, config), reader_task)
    }

    pub fn queue(&self) -> &Arc<CorrelationQueue> {
        &self.queue
    }

    pub fn config(&self) -> ExchangeConfig {
        self.config
    }

    /// Writes `command` and assembles the reply described by `shape`.
    ///
    /// # Errors
    ///
    /// - `Unavailable` once the worker's output has closed.
    /// - `Timeout` if a reply line does not arrive within `reply_timeout`,
    ///   including a line still owed to an earlier exchange. In that case
    ///   `command` is not written.
    /// - `Protocol` if the reply does not fit `shape`.
    pub async fn exchange(&self, command: &str, shape: ReplyShape) -> Result<Reply, ExchangeError> {
        let verb = command.split_whitespace().next().unwrap_or_default();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        if self.queue.is_closed() {
            return Err(self.unavailable());
        }

        let mut slot = self.slot.lock().await;
        if self.queue.is_closed() {
            return Err(self.unavailable());
        }

        self.settle(&mut slot, verb).await?;

        debug!(sequence, command = verb, "exchange started");

        let result = self.run(&mut slot, command, verb, shape).await;

        match &result {
            Ok(reply) => debug!(sequence, command = verb, rejected = reply.is_rejected(), "exchange finished"),
            Err(ExchangeError::Protocol { detail, .. }) => {
                error!(sequence, command = verb, detail = %detail, "protocol error");
            }
            Err(e) => warn!(sequence, command = verb, error = %e, owed = ?slot.owed, "exchange failed"),
        }
        result
    }

    /// Writes the command and reads its reply, keeping `slot.owed` current
    /// at every await so a dropped or failed exchange leaves an exact record.
    async fn run(
        &self,
        slot: &mut ExchangeSlot,
        command: &str,
        verb: &str,
        shape: ReplyShape,
    ) -> Result<Reply, ExchangeError> {
        slot.owed = Owed::Unknown;
        if let Err(e) = slot.writer.write_line(command).await {
            return Err(self.write_failure(e));
        }

        match shape {
            ReplyShape::Silent => {
                slot.owed = Owed::Nothing;
                Ok(Reply::Empty)
            }
            ReplyShape::Single => {
                slot.owed = Owed::Lines(1);
                let line = self.read_line(verb).await?;
                slot.owed = Owed::Nothing;
                Ok(Reply::Line(line))
            }
            ReplyShape::CountPrefixed { fields } => {
                slot.owed = Owed::Header;
                let header = self.read_line(verb).await?;
                if header == INVALID_SENTINEL {
                    slot.owed = Owed::Nothing;
                    return Ok(Reply::Line(header));
                }

                let Some(count) = parse_count(&header) else {
                    slot.owed = Owed::Unknown;
                    return Err(ExchangeError::protocol(
                        verb,
                        format!("expected row count, got {header:?}"),
                    ));
                };
                slot.owed = Owed::Lines(count);

                let mut rows: Vec<Row> = Vec::with_capacity(count.min(256));
                let mut mismatch = None;
                // Every declared row is consumed even after a bad one, so the
                // channel stays aligned for the next exchange.
                for remaining in (0..count).rev() {
                    let line = self.read_line(verb).await?;
                    slot.owed = Owed::Lines(remaining);
                    let row: Row = line.split('\t').map(str::to_string).collect();
                    if row.len() != fields {
                        if mismatch.is_none() {
                            mismatch = Some(ReplyError::FieldCount {
                                expected: fields,
                                got: row.len(),
                            });
                        }
                    } else {
                        rows.push(row);
                    }
                }
                slot.owed = Owed::Nothing;

                match mismatch {
                    Some(err) => Err(ExchangeError::protocol(verb, err.to_string())),
                    None => {
                        debug!(command = verb, lines = count, "rows assembled");
                        Ok(Reply::Rows(rows))
                    }
                }
            }
        }
    }

    async fn read_line(&self, verb: &str) -> Result<String, ExchangeError> {
        match timeout(self.config.reply_timeout, self.queue.next_line()).await {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(_closed)) => Err(self.unavailable()),
            Err(_elapsed) => {
                self.queue.prune_cancelled();
                Err(ExchangeError::Timeout {
                    verb: verb.to_string(),
                    timeout: self.config.reply_timeout,
                })
            }
        }
    }

    /// Brings the channel back in step before a new command is written.
    ///
    /// Owed lines are discarded one by one, each wait bounded by
    /// `reply_timeout`. Only when the debt is unknown does the channel fall
    /// back to draining until quiet.
    async fn settle(&self, slot: &mut ExchangeSlot, verb: &str) -> Result<(), ExchangeError> {
        loop {
            match slot.owed {
                Owed::Nothing => {
                    self.discard_unsolicited();
                    return Ok(());
                }
                Owed::Lines(0) => slot.owed = Owed::Nothing,
                Owed::Lines(remaining) => {
                    let line = self.read_owed(verb, slot.owed).await?;
                    error!(line = %line, remaining = remaining - 1, "discarding stale worker reply");
                    slot.owed = Owed::Lines(remaining - 1);
                }
                Owed::Header => {
                    let line = self.read_owed(verb, slot.owed).await?;
                    error!(line = %line, "discarding stale worker reply");
                    slot.owed = if line == INVALID_SENTINEL {
                        Owed::Nothing
                    } else {
                        parse_count(&line).map_or(Owed::Unknown, Owed::Lines)
                    };
                }
                Owed::Unknown => {
                    self.resync(verb).await?;
                    slot.owed = Owed::Nothing;
                }
            }
        }
    }

    async fn read_owed(&self, verb: &str, owed: Owed) -> Result<String, ExchangeError> {
        self.read_line(verb).await.inspect_err(|e| {
            if matches!(e, ExchangeError::Timeout { .. }) {
                warn!(command = verb, owed = ?owed, "earlier reply still outstanding, command not sent");
            }
        })
    }

    /// Drains stale output until the channel has been quiet for
    /// `resync_grace`, bounded overall by `reply_timeout`.
    async fn resync(&self, verb: &str) -> Result<(), ExchangeError> {
        for line in self.queue.discard_buffered() {
            error!(line = %line, "discarding stale worker output");
        }

        let drain = async {
            loop {
                match timeout(self.config.resync_grace, self.queue.next_line()).await {
                    Ok(Ok(line)) => error!(line = %line, "discarding stale worker output"),
                    Ok(Err(_closed)) => return Err(self.unavailable()),
                    Err(_quiet) => {
                        self.queue.prune_cancelled();
                        return Ok(());
                    }
                }
            }
        };

        match timeout(self.config.reply_timeout, drain).await {
            Ok(result) => {
                if result.is_ok() {
                    debug!(command = verb, "channel resynchronized");
                }
                result
            }
            Err(_elapsed) => {
                self.queue.prune_cancelled();
                Err(ExchangeError::protocol(
                    verb,
                    "worker kept emitting unsolicited output during resync",
                ))
            }
        }
    }

    fn discard_unsolicited(&self) {
        for line in self.queue.discard_buffered() {
            warn!(line = %line, "discarding unsolicited worker output");
        }
    }

    fn write_failure(&self, err: TransportError) -> ExchangeError {
        if self.queue.is_closed() {
            return self.unavailable();
        }
        match &err {
            TransportError::Io(io_err) if io_err.kind() == io::ErrorKind::BrokenPipe => {
                ExchangeError::unavailable("worker input closed")
            }
            _ => ExchangeError::Transport(err),
        }
    }

    fn unavailable(&self) -> ExchangeError {
        let reason = self
            .queue
            .close_reason()
            .unwrap_or_else(|| "worker channel closed".to_string());
        ExchangeError::unavailable(reason)
    }
}

fn parse_count(header: &str) -> Option<usize> {
    header.trim().parse().ok()
}

#[async_trait]
impl CommandChannel for ExchangeCoordinator {
    async fn exchange(&self, command: &str, shape: ReplyShape) -> Result<Reply, ExchangeError> {
        ExchangeCoordinator::exchange(self, command, shape).await
    }
}
