//! Bridge configuration
//!
//! Read once at process start and shared read-only between requests.

use crate::error::{Error, Result};
use std::env;

/// Default mailboxes left out of hierarchy listings.
pub const DEFAULT_EXCLUDED_MAILBOXES: &[&str] = &["Junk", "Draft", "Drafts"];

/// How the TLS layer is established on the IMAP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte (IMAPS, port 993).
    Tls,
    /// Plain TCP upgraded with the STARTTLS command.
    StartTls,
}

impl Security {
    const fn default_port(self) -> u16 {
        match self {
            Self::Tls => 993,
            Self::StartTls => 143,
        }
    }
}

/// IMAP backend and mailbox policy configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub security: Security,
    /// Skip certificate verification (self-signed test servers).
    pub accept_invalid_certs: bool,
    /// Mailbox names never reported by the hierarchy listing.
    pub excluded_mailboxes: Vec<String>,
    /// Whether `getMail` downloads attachment payloads or only lists
    /// their names and types.
    pub inline_attachment_data: bool,
}

impl BridgeConfig {
    /// Configuration for `host` with every other setting at its default.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Security::Tls.default_port(),
            security: Security::Tls,
            accept_invalid_certs: false,
            excluded_mailboxes: DEFAULT_EXCLUDED_MAILBOXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            inline_attachment_data: true,
        }
    }

    /// Load the configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_HOST`
    ///
    /// Optional (with defaults):
    /// - `IMAP_SECURITY` (`tls` or `starttls`, default: `tls`)
    /// - `IMAP_PORT` (default: `993`, or `143` with STARTTLS)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    /// - `MAIL_EXCLUDED_BOXES` (comma separated, default: `Junk,Draft,Drafts`)
    /// - `MAIL_INLINE_ATTACHMENT_DATA` (default: `true`)
    ///
    /// # Errors
    ///
    /// Returns an error if `IMAP_HOST` is missing or a value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `IMAP_HOST` is missing or a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("IMAP_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| Error::Config("IMAP_HOST not set".into()))?;

        let security = match lookup("IMAP_SECURITY") {
            None => Security::Tls,
            Some(value) => parse_security(&value)?,
        };

        let port = match lookup("IMAP_PORT") {
            None => security.default_port(),
            Some(value) => value
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
        };

        let accept_invalid_certs = lookup("IMAP_ACCEPT_INVALID_CERTS")
            .map(|v| parse_bool("IMAP_ACCEPT_INVALID_CERTS", &v))
            .transpose()?
            .unwrap_or(false);

        let inline_attachment_data = lookup("MAIL_INLINE_ATTACHMENT_DATA")
            .map(|v| parse_bool("MAIL_INLINE_ATTACHMENT_DATA", &v))
            .transpose()?
            .unwrap_or(true);

        let excluded_mailboxes = lookup("MAIL_EXCLUDED_BOXES").map_or_else(
            || {
                DEFAULT_EXCLUDED_MAILBOXES
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            },
            |v| split_list(&v),
        );

        Ok(Self {
            host,
            port,
            security,
            accept_invalid_certs,
            excluded_mailboxes,
            inline_attachment_data,
        })
    }
}

/// Split a comma separated list, dropping blank entries.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_security(value: &str) -> Result<Security> {
    match value.trim().to_ascii_lowercase().as_str() {
        "tls" | "ssl" | "imaps" => Ok(Security::Tls),
        "starttls" => Ok(Security::StartTls),
        other => Err(Error::Config(format!("Invalid IMAP_SECURITY: {other}"))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("Invalid {key}: {other}"))),
    }
}
