//! Scripted stand-ins for the worker channel.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use folio_protocol::{Reply, ReplyShape};

use crate::mux::{CommandChannel, ExchangeError};

/// Answers exchanges from a fixed script and records every command line.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    replies: Mutex<VecDeque<Result<Reply, ExchangeError>>>,
    seen: Mutex<Vec<(String, ReplyShape)>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(self, text: &str) -> Self {
        self.push(Ok(Reply::Line(text.to_string())))
    }

    pub fn rows(self, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|field| field.to_string()).collect())
            .collect();
        self.push(Ok(Reply::Rows(rows)))
    }

    pub fn error(self, err: ExchangeError) -> Self {
        self.push(Err(err))
    }

    fn push(self, reply: Result<Reply, ExchangeError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    /// Command lines written so far.
    pub fn commands(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|(line, _)| line.clone()).collect()
    }

    pub fn shapes(&self) -> Vec<ReplyShape> {
        self.seen.lock().unwrap().iter().map(|(_, shape)| *shape).collect()
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn exchange(&self, command: &str, shape: ReplyShape) -> Result<Reply, ExchangeError> {
        self.seen.lock().unwrap().push((command.to_string(), shape));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ExchangeError::unavailable("script exhausted")))
    }
}
