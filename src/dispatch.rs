//! Request validation and action execution
//!
//! [`Dispatcher::handle`] is the one entry point outer surfaces call. It
//! turns raw query parameters into a typed [`BridgeRequest`], opens a
//! [`Session`] for it, runs the action, closes the session, and shapes
//! the JSON [`Response`]. Any failure becomes `{"status":"fail"}`; the
//! cause goes to the log only.

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::mime::{self, Attachment, BodyKind, PartClass};
use crate::mutate;
use crate::navigator::{self, Hierarchy};
use crate::session::{Credentials, Session};
use crate::structure::{self, FetchedMessage};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One supported action and the parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Login,
    Hierarchy,
    GetMail { mailbox: String, uid: u32 },
    GetAttachment { mailbox: String, uid: u32 },
    SetRead { mailbox: String, uid: u32 },
    MoveMail {
        mailbox: String,
        uid: u32,
        destination: String,
    },
}

impl Action {
    /// Wire name, as accepted in the `action` parameter.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Hierarchy => "hierarchy",
            Self::GetMail { .. } => "getMail",
            Self::GetAttachment { .. } => "getAttachment",
            Self::SetRead { .. } => "setRead",
            Self::MoveMail { .. } => "moveMail",
        }
    }

    /// Build an action from `action`, `box`, `mailId`, and `newBox`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an unknown action or a missing,
    /// empty, or malformed parameter.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let action = required(params, "action")?;
        let action = match action {
            "login" => Self::Login,
            "hierarchy" => Self::Hierarchy,
            "getMail" => Self::GetMail {
                mailbox: required(params, "box")?.to_string(),
                uid: message_uid(params)?,
            },
            "getAttachment" => Self::GetAttachment {
                mailbox: required(params, "box")?.to_string(),
                uid: message_uid(params)?,
            },
            "setRead" => Self::SetRead {
                mailbox: required(params, "box")?.to_string(),
                uid: message_uid(params)?,
            },
            "moveMail" => Self::MoveMail {
                mailbox: required(params, "box")?.to_string(),
                uid: message_uid(params)?,
                destination: required(params, "newBox")?.to_string(),
            },
            other => return Err(Error::Validation(format!("unknown action '{other}'"))),
        };
        Ok(action)
    }
}

fn required<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    match params.get(name).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(Error::Validation(format!("'{name}' is empty"))),
        None => Err(Error::Validation(format!("'{name}' is missing"))),
    }
}

fn message_uid(params: &HashMap<String, String>) -> Result<u32> {
    let raw = required(params, "mailId")?;
    match raw.parse::<u32>() {
        Ok(uid) if uid > 0 => Ok(uid),
        _ => Err(Error::Validation(format!("'mailId' is not a UID: {raw}"))),
    }
}

/// A validated request: who is asking and what they want.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub credentials: Credentials,
    pub action: Action,
}

impl BridgeRequest {
    /// Validate query parameters.
    ///
    /// When a name appears more than once, the first value counts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a required parameter is missing,
    /// empty, or malformed.
    pub fn from_params<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = HashMap::new();
        for (name, value) in pairs {
            params.entry(name.into()).or_insert_with(|| value.into());
        }

        let action = Action::from_params(&params)?;
        let credentials = Credentials::new(required(&params, "id")?, required(&params, "password")?);
        Ok(Self {
            credentials,
            action,
        })
    }
}

/// `getMail` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDetail {
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl MessageDetail {
    fn new(
        message: FetchedMessage,
        text: Option<String>,
        html: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Self {
        let headers = message.headers;
        Self {
            uid: message.uid,
            flags: message.flags,
            title: headers.subject,
            date: headers.date,
            from: headers.from,
            to: headers.to,
            cc: headers.cc,
            text,
            html,
            attachments,
        }
    }
}

/// Action-specific success payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Hierarchy(Hierarchy),
    Mail(Box<MessageDetail>),
    Attachments(Vec<Attachment>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

/// JSON body returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

impl Response {
    #[must_use]
    pub const fn success(content: Option<Content>) -> Self {
        Self {
            status: Status::Success,
            content,
        }
    }

    #[must_use]
    pub const fn fail() -> Self {
        Self {
            status: Status::Fail,
            content: None,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }

    /// Serialized body.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"status":"fail"}"#.to_string())
    }
}

/// Runs validated requests against the configured IMAP server.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<BridgeConfig>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Validate, execute, and shape the response.
    pub async fn handle<I, K, V>(&self, params: I) -> Response
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let request = match BridgeRequest::from_params(params) {
            Ok(request) => request,
            Err(e) => {
                warn!(kind = e.kind(), "Rejected request: {}", e);
                return Response::fail();
            }
        };

        match self.execute(&request).await {
            Ok(content) => Response::success(content),
            Err(e) => {
                warn!(
                    action = request.action.name(),
                    kind = e.kind(),
                    "Request failed: {}",
                    e
                );
                Response::fail()
            }
        }
    }

    /// Open a session, run the action, and close the session whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first error met while opening the session or running
    /// the action.
    pub async fn execute(&self, request: &BridgeRequest) -> Result<Option<Content>> {
        let mut session = Session::open(&self.config, &request.credentials).await?;
        info!(
            "Authenticated {} for {}",
            request.credentials.identity(),
            request.action.name()
        );

        let outcome = self.run(&mut session, &request.action).await;
        session.close().await;
        outcome
    }

    async fn run(&self, session: &mut Session, action: &Action) -> Result<Option<Content>> {
        match action {
            Action::Login => Ok(None),
            Action::Hierarchy => {
                let hierarchy =
                    navigator::get_hierarchy(session, &self.config.excluded_mailboxes).await?;
                Ok(Some(Content::Hierarchy(hierarchy)))
            }
            Action::GetMail { mailbox, uid } => {
                let detail = self.get_mail(session, mailbox, *uid).await?;
                Ok(Some(Content::Mail(Box::new(detail))))
            }
            Action::GetAttachment { mailbox, uid } => {
                let message = structure::fetch_structure(session, mailbox, *uid).await?;
                let parts = mime::flatten(message.structure.as_ref());
                let downloads =
                    mime::download_selected(session, &message, &parts, &[PartClass::Attachment])
                        .await?;
                Ok(Some(Content::Attachments(downloads.attachments)))
            }
            Action::SetRead { mailbox, uid } => {
                mutate::add_flag(session, mailbox, *uid, &Flag::Seen).await?;
                Ok(None)
            }
            Action::MoveMail {
                mailbox,
                uid,
                destination,
            } => {
                mutate::move_message(session, mailbox, *uid, destination).await?;
                Ok(None)
            }
        }
    }

    async fn get_mail(&self, session: &mut Session, mailbox: &str, uid: u32) -> Result<MessageDetail> {
        let message = structure::fetch_structure(session, mailbox, uid).await?;
        let parts = mime::flatten(message.structure.as_ref());
        debug!("UID {} has {} leaf parts", uid, parts.len());

        let inline_data = self.config.inline_attachment_data;
        let mut wanted = vec![
            PartClass::Inline(BodyKind::Plain),
            PartClass::Inline(BodyKind::Html),
        ];
        if inline_data {
            wanted.push(PartClass::Attachment);
        }

        let downloads = mime::download_selected(session, &message, &parts, &wanted).await?;
        let attachments = if inline_data {
            downloads.attachments
        } else {
            mime::attachment_metadata(&parts)
        };

        Ok(MessageDetail::new(
            message,
            downloads.plain,
            downloads.html,
            attachments,
        ))
    }
}
