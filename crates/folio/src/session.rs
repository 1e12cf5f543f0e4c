//! The process-wide login session.
//!
//! The backend keeps one login stack for its single stdin, so the front keeps
//! one session for every HTTP client. It changes only through
//! [`SessionState::authenticate`] and [`SessionState::logout`], which are
//! serialized among themselves so the stored identity always matches the last
//! completed login exchange.

use std::sync::{Arc, RwLock};

use folio_protocol::{Command, INVALID_SENTINEL, Privilege, Reply};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::mux::{CommandChannel, ExchangeError};
use crate::store::StoreError;

/// Who is logged in right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// `None` for a guest.
    pub identity: Option<String>,
    pub privilege: Privilege,
}

impl SessionSnapshot {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn level(&self) -> u8 {
        self.privilege.level()
    }
}

pub struct SessionState {
    channel: Arc<dyn CommandChannel>,
    current: RwLock<SessionSnapshot>,
    auth: Mutex<()>,
}

impl SessionState {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            channel,
            current: RwLock::new(SessionSnapshot::guest()),
            auth: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.current
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Logs in as `identity`.
    ///
    /// # Errors
    ///
    /// `AuthFailed` when the backend rejects the credentials. Any failure
    /// after the command was sent leaves the session as a guest.
    pub async fn authenticate(
        &self,
        identity: &str,
        secret: &str,
    ) -> Result<SessionSnapshot, StoreError> {
        let command = Command::SwitchUser {
            id: identity.to_string(),
            password: secret.to_string(),
        };
        let line = command.to_line()?;

        let _guard = self.auth.lock().await;
        let reply = match self.channel.exchange(&line, command.reply_shape()).await {
            Ok(reply) => reply,
            Err(e) => {
                self.set(SessionSnapshot::guest());
                return Err(e.into());
            }
        };

        let text = match reply {
            Reply::Line(text) => text,
            other => {
                self.set(SessionSnapshot::guest());
                return Err(ExchangeError::protocol(
                    command.verb(),
                    format!("expected a privilege line, got {other:?}"),
                )
                .into());
            }
        };

        if text == INVALID_SENTINEL {
            self.set(SessionSnapshot::guest());
            info!(identity, "login rejected");
            return Err(StoreError::AuthFailed);
        }

        match Privilege::from_login_reply(&text) {
            Some(privilege) => {
                let snapshot = SessionSnapshot {
                    identity: Some(identity.to_string()),
                    privilege,
                };
                self.set(snapshot.clone());
                info!(identity, privilege = %privilege, "logged in");
                Ok(snapshot)
            }
            None => {
                self.set(SessionSnapshot::guest());
                Err(ExchangeError::protocol(
                    command.verb(),
                    format!("expected privilege 1, 3 or 7, got {text:?}"),
                )
                .into())
            }
        }
    }

    /// Logs out. The session is a guest afterwards whatever the backend says.
    pub async fn logout(&self) -> Result<SessionSnapshot, StoreError> {
        let command = Command::Logout;
        let _guard = self.auth.lock().await;

        let result = match command.to_line() {
            Ok(line) => self.channel.exchange(&line, command.reply_shape()).await,
            Err(e) => {
                self.set(SessionSnapshot::guest());
                return Err(e.into());
            }
        };
        self.set(SessionSnapshot::guest());

        match result {
            Ok(reply) => {
                if reply.is_rejected() {
                    warn!("backend had nobody logged in");
                }
                info!("logged out");
                Ok(SessionSnapshot::guest())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fails with `Forbidden` unless the session holds at least `min`.
    pub fn require_privilege(&self, min: Privilege) -> Result<SessionSnapshot, StoreError> {
        let snapshot = self.snapshot();
        if snapshot.privilege >= min {
            Ok(snapshot)
        } else {
            Err(StoreError::Forbidden {
                required: min,
                current: snapshot.privilege,
            })
        }
    }

    fn set(&self, snapshot: SessionSnapshot) {
        *self
            .current
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = snapshot;
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("current", &self.snapshot())
            .finish_non_exhaustive()
    }
}
