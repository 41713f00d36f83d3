//! Per-request IMAP session
//!
//! A [`Session`] owns one authenticated connection and remembers which
//! mailbox is selected. [`Session::select_mailbox`] is the only way to
//! change the target of later header, structure, and part operations.

use crate::config::BridgeConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use imap_proto::{Response, Status};
use std::fmt;
use tracing::{debug, info, warn};

/// Identity and secret used once to open a [`Session`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One authenticated IMAP connection plus its selected mailbox.
pub struct Session {
    imap: Option<ImapSession>,
    selected: Option<String>,
}

impl Session {
    /// Connect, negotiate TLS, and log in.
    ///
    /// Every failure cause is reported as [`Error::Auth`]; the cause
    /// text is only meant for logs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] on any connection or login failure.
    pub async fn open(config: &BridgeConfig, credentials: &Credentials) -> Result<Self> {
        let imap = connection::connect(config, credentials)
            .await
            .map_err(|e| match e {
                Error::Auth(reason) => Error::Auth(reason),
                other => Error::Auth(other.to_string()),
            })?;

        Ok(Self {
            imap: Some(imap),
            selected: None,
        })
    }

    /// The mailbox currently selected, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// SELECT `mailbox` unless it is already the selected one.
    ///
    /// Returns the number of messages the server reported for it, or
    /// `None` when no SELECT was needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Select`] if the server rejects the SELECT.
    pub async fn select_mailbox(&mut self, mailbox: &str) -> Result<Option<u32>> {
        if self.selected.as_deref() == Some(mailbox) {
            debug!("{} already selected", mailbox);
            return Ok(None);
        }

        // A failed SELECT leaves the server with nothing selected.
        self.selected = None;
        let imap = self.imap_mut()?;
        let info = imap.select(mailbox).await.map_err(|e| Error::Select {
            mailbox: mailbox.to_string(),
            reason: e.to_string(),
        })?;

        info!("Selected {} ({} messages)", mailbox, info.exists);
        self.selected = Some(mailbox.to_string());
        Ok(Some(info.exists))
    }

    /// Borrow the underlying IMAP session for a command.
    pub(crate) fn imap_mut(&mut self) -> Result<&mut ImapSession> {
        self.imap
            .as_mut()
            .ok_or_else(|| Error::Imap("Session is closed".into()))
    }

    /// Send `command` and pass every response before its tagged
    /// completion to `on_data`.
    ///
    /// Unlike the typed `async-imap` helpers for SEARCH, FETCH, and
    /// STORE, this fails when the completion is NO or BAD.
    ///
    /// # Errors
    ///
    /// Returns `reject(reason)` if the command cannot be sent, the
    /// connection drops, or the server refuses the command.
    pub(crate) async fn run_checked<D, R>(
        &mut self,
        command: &str,
        mut on_data: D,
        reject: R,
    ) -> Result<()>
    where
        D: FnMut(&Response<'_>),
        R: Fn(String) -> Error,
    {
        let imap = self.imap_mut()?;
        let tag = imap
            .run_command(command)
            .await
            .map_err(|e| reject(e.to_string()))?;

        loop {
            let Some(data) = imap
                .read_response()
                .await
                .map_err(|e| reject(e.to_string()))?
            else {
                return Err(reject("connection closed".into()));
            };

            match data.parsed() {
                Response::Done {
                    tag: done,
                    status,
                    information,
                    ..
                } if *done == tag => {
                    return match status {
                        Status::Ok => Ok(()),
                        other => Err(reject(format!(
                            "{other:?} {}",
                            information.as_deref().unwrap_or_default()
                        ))),
                    };
                }
                response => on_data(response),
            }
        }
    }

    /// LOGOUT and drop the connection.
    ///
    /// Safe to call more than once and on a session whose connection
    /// already failed; later calls do nothing.
    pub async fn close(&mut self) {
        self.selected = None;
        let Some(mut imap) = self.imap.take() else {
            return;
        };
        if let Err(e) = imap.logout().await {
            warn!("LOGOUT failed: {}", e);
        } else {
            debug!("Session closed");
        }
    }

    /// Whether [`Session::close`] has already run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.imap.is_none()
    }
}
