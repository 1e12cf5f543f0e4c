//! Lifecycle of the single backend process.
//!
//! The backend is spawned once. When it exits, or its output closes, the
//! correlation queue is closed and every exchange from then on fails with
//! `Unavailable`. There is no restart.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use folio_protocol::{Command as WireCommand, ReplyShape};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::config::WorkerConfig;
use super::error::WorkerError;
use super::transport::{LineWriter, spawn_line_reader, spawn_stderr_drain};
use crate::mux::{CorrelationQueue, ExchangeCoordinator};

/// Upper bound on reaping the process after a kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Observable state of the backend process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum WorkerStatus {
    Running { pid: Option<u32> },
    Exited { reason: String },
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Owns the running backend and the coordinator wired to its streams.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct WorkerHandle {
    coordinator: Arc<ExchangeCoordinator>,
    status: watch::Receiver<WorkerStatus>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    pid: Option<u32>,
}

impl WorkerHandle {
    /// Starts the backend described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `BinaryNotFound` when the executable does not exist, `SpawnFailed`
    /// for any other launch failure.
    pub fn spawn(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let command_display = config.command.display().to_string();

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                WorkerError::BinaryNotFound {
                    command: command_display.clone(),
                    source,
                }
            } else {
                WorkerError::SpawnFailed {
                    message: format!("{command_display}: {source}"),
                    source,
                }
            }
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(WorkerError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(WorkerError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr);
        }

        let queue = Arc::new(CorrelationQueue::new());
        spawn_line_reader(stdout, Arc::clone(&queue));
        let coordinator = Arc::new(ExchangeCoordinator::new(
            LineWriter::new(stdin),
            Arc::clone(&queue),
            config.exchange_config(),
        ));

        let (status_tx, status_rx) = watch::channel(WorkerStatus::Running { pid });
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let reason = tokio::select! {
                exit = child.wait() => match exit {
                    Ok(status) => format!("worker exited ({status})"),
                    Err(e) => format!("failed to wait for worker: {e}"),
                },
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill worker");
                    }
                    match timeout(KILL_WAIT, child.wait()).await {
                        Ok(Ok(status)) => format!("worker killed ({status})"),
                        Ok(Err(e)) => format!("worker killed, wait failed: {e}"),
                        Err(_) => "worker killed, still not reaped".to_string(),
                    }
                }
            };

            warn!(pid, reason = %reason, "worker process ended");
            queue.close(reason.clone());
            let _ = status_tx.send(WorkerStatus::Exited { reason });
        });

        info!(pid, command = %command_display, "worker process started");

        Ok(Self {
            coordinator,
            status: status_rx,
            kill: Mutex::new(Some(kill_tx)),
            pid,
        })
    }

    pub fn coordinator(&self) -> Arc<ExchangeCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.status.clone()
    }

    /// Waits until the process has ended and returns why.
    pub async fn exited(&self) -> String {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|s| matches!(s, WorkerStatus::Exited { .. }))
            .await;
        match current.as_deref() {
            Ok(WorkerStatus::Exited { reason }) => reason.clone(),
            _ => "worker monitor stopped".to_string(),
        }
    }

    /// Sends `exit`, waits up to `grace` for the process to leave, then
    /// kills it. Returns the exit reason.
    pub async fn shutdown(&self, grace: Duration) -> String {
        if let WorkerStatus::Exited { reason } = self.status() {
            return reason;
        }

        let exit = WireCommand::Exit;
        match self.coordinator.exchange(exit.verb(), ReplyShape::Silent).await {
            Ok(_) => debug!(pid = self.pid, "exit sent to worker"),
            Err(e) => debug!(pid = self.pid, error = %e, "could not send exit to worker"),
        }

        if let Ok(reason) = timeout(grace, self.exited()).await {
            info!(pid = self.pid, reason = %reason, "worker shut down");
            return reason;
        }

        warn!(pid = self.pid, grace_ms = grace.as_millis() as u64, "worker ignored exit, killing");
        self.kill();
        self.exited().await
    }

    fn kill(&self) {
        let sender = self
            .kill
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}
