//! Stateless HTTP-to-IMAP bridge
//!
//! Every request opens its own authenticated IMAP session, performs a
//! single mailbox operation, closes the session, and produces a JSON
//! [`Response`]. Nothing is cached or pooled between requests.
//!
//! [`Dispatcher::handle`] is the entry point: give it the raw query
//! parameters (`action`, `id`, `password`, `box`, `mailId`, `newBox`)
//! and it returns `{"status":"success","content":...}` or
//! `{"status":"fail"}`.
//!
//! The building blocks are public too: [`Session`] for connection and
//! mailbox selection, [`navigator`] for the mailbox hierarchy,
//! [`structure`] for header fields and BODYSTRUCTURE, and [`mime`] for
//! part classification and download.

mod config;
mod connection;
mod dispatch;
mod error;
mod flag;
pub mod mime;
mod mutate;
pub mod navigator;
mod session;
pub mod structure;

pub use config::{BridgeConfig, DEFAULT_EXCLUDED_MAILBOXES, Security, split_list};
pub use dispatch::{
    Action, BridgeRequest, Content, Dispatcher, MessageDetail, Response, Status,
};
pub use error::{Error, Result};
pub use flag::Flag;
pub use mime::{Attachment, MimePart, PartClass};
pub use mutate::{add_flag, move_message};
pub use navigator::{Hierarchy, MessageSummary};
pub use session::{Credentials, Session};
pub use structure::{BodyNode, FetchedMessage};
