//! Error types for mailbox-bridge
//!
//! Every variant carries the internal cause as a string so it can be
//! logged. None of it is ever shown to the HTTP caller: the dispatcher
//! collapses all of them into a bare `{"status":"fail"}`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required request parameter is missing, empty, or malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Connection, TLS negotiation, or LOGIN failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to select {mailbox}: {reason}")]
    Select { mailbox: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    /// The query ran but matched nothing.
    #[error("No message with UID {uid} in {mailbox}")]
    NotFound { mailbox: String, uid: u32 },

    #[error("Failed to download part {part}: {reason}")]
    Part { part: String, reason: String },

    #[error("Server rejected {operation}: {reason}")]
    Mutation {
        operation: &'static str,
        reason: String,
    },

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Short stable label for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::Select { .. } => "select",
            Self::Search(_) => "search",
            Self::NotFound { .. } => "not_found",
            Self::Part { .. } => "part",
            Self::Mutation { .. } => "mutation",
            Self::Imap(_) => "imap",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Tls(_) => "tls",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
