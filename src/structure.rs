//! Message header fields and MIME structure
//!
//! Fetches envelope fields, flags, and the BODYSTRUCTURE tree of a
//! single message without downloading any body content. The borrowed
//! `imap-proto` tree is converted into the owned [`BodyNode`] so it can
//! outlive the FETCH response.

use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::mime::TransferEncoding;
use crate::session::Session;
use futures::StreamExt;
use imap_proto::types::{Address, BodyParams, BodyStructure, Envelope};
use tracing::debug;

const STRUCTURE_QUERY: &str = "(UID FLAGS INTERNALDATE ENVELOPE BODYSTRUCTURE)";

/// Content disposition of a part (`inline` or `attachment` plus
/// parameters such as `filename`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    pub kind: String,
    pub params: Vec<(String, String)>,
}

impl Disposition {
    /// Parameter value, matched case-insensitively.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }
}

/// Everything the structure says about one leaf part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// Top-level media type (`TEXT`, `APPLICATION`, ...).
    pub media_type: String,
    /// Media subtype (`PLAIN`, `HTML`, `PDF`, ...).
    pub subtype: String,
    /// Content-Type parameters (`charset`, `name`, ...).
    pub params: Vec<(String, String)>,
    pub disposition: Option<Disposition>,
    pub encoding: TransferEncoding,
    /// Encoded size in octets, as reported by the server.
    pub size: u32,
}

impl PartInfo {
    /// Content-Type parameter value, matched case-insensitively.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        find_param(&self.params, name)
    }
}

/// Owned MIME structure tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyNode {
    /// A leaf part. `message/rfc822` parts are leaves too.
    Part(PartInfo),
    Multipart {
        subtype: String,
        children: Vec<Self>,
    },
}

/// Header fields requested with the structure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    pub subject: Option<String>,
    pub date: Option<String>,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
}

/// Result of [`fetch_structure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Mailbox the message was fetched from.
    pub mailbox: String,
    pub uid: u32,
    pub flags: Vec<Flag>,
    pub headers: Headers,
    /// `None` when the server sent no usable BODYSTRUCTURE.
    pub structure: Option<BodyNode>,
}

/// Select `mailbox` and fetch header fields plus structure of `uid`.
///
/// Fails with [`Error::NotFound`] when the mailbox holds no such UID.
///
/// # Errors
///
/// Returns an error if the SELECT or FETCH fails, or the UID is unknown.
pub async fn fetch_structure(
    session: &mut Session,
    mailbox: &str,
    uid: u32,
) -> Result<FetchedMessage> {
    session.select_mailbox(mailbox).await?;
    let imap = session.imap_mut()?;

    let mut fetches = imap
        .uid_fetch(uid.to_string(), STRUCTURE_QUERY)
        .await
        .map_err(|e| Error::Search(format!("Structure fetch failed: {e}")))?;

    let mut found = None;
    while let Some(item) = fetches.next().await {
        let fetch = item.map_err(|e| Error::Search(format!("Structure fetch error: {e}")))?;
        if fetch.uid != Some(uid) || found.is_some() {
            continue;
        }

        let mut headers = fetch.envelope().map(headers_from_envelope).unwrap_or_default();
        if let Some(internal) = fetch.internal_date() {
            headers.date = Some(internal.to_rfc3339());
        }

        found = Some(FetchedMessage {
            mailbox: mailbox.to_string(),
            uid,
            flags: fetch.flags().map(|f| Flag::from(&f)).collect(),
            headers,
            structure: fetch.bodystructure().map(body_node),
        });
    }
    drop(fetches);

    let message = found.ok_or_else(|| Error::NotFound {
        mailbox: mailbox.to_string(),
        uid,
    })?;
    debug!(
        "Fetched structure of UID {} (structure present: {})",
        uid,
        message.structure.is_some()
    );
    Ok(message)
}

/// Convert an `imap-proto` BODYSTRUCTURE into an owned tree.
#[must_use]
pub fn body_node(structure: &BodyStructure<'_>) -> BodyNode {
    match structure {
        BodyStructure::Basic { common, other, .. }
        | BodyStructure::Text { common, other, .. }
        | BodyStructure::Message { common, other, .. } => BodyNode::Part(PartInfo {
            media_type: common.ty.ty.to_string(),
            subtype: common.ty.subtype.to_string(),
            params: owned_params(&common.ty.params),
            disposition: common.disposition.as_ref().map(|d| Disposition {
                kind: d.ty.to_string(),
                params: owned_params(&d.params),
            }),
            encoding: TransferEncoding::from(&other.transfer_encoding),
            size: other.octets,
        }),
        BodyStructure::Multipart { common, bodies, .. } => BodyNode::Multipart {
            subtype: common.ty.subtype.to_string(),
            children: bodies.iter().map(body_node).collect(),
        },
    }
}

fn owned_params(params: &BodyParams<'_>) -> Vec<(String, String)> {
    params
        .as_ref()
        .map(|list| {
            list.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn find_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn headers_from_envelope(envelope: &Envelope<'_>) -> Headers {
    Headers {
        subject: envelope.subject.as_deref().map(lossy),
        date: envelope.date.as_deref().map(lossy).map(normalize_date),
        from: addresses(envelope.from.as_deref()),
        to: addresses(envelope.to.as_deref()),
        cc: addresses(envelope.cc.as_deref()),
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// RFC 2822 `Date:` header as RFC 3339; unparsable values are kept.
fn normalize_date(raw: String) -> String {
    chrono::DateTime::parse_from_rfc2822(raw.trim()).map_or(raw, |date| date.to_rfc3339())
}

fn addresses(list: Option<&[Address<'_>]>) -> Vec<String> {
    list.unwrap_or_default()
        .iter()
        .filter_map(format_address)
        .collect()
}

/// `Name <mailbox@host>`, or the bare address without a display name.
fn format_address(addr: &Address<'_>) -> Option<String> {
    let mailbox = addr.mailbox.as_deref().map(lossy)?;
    // Group syntax markers carry no host.
    let address = match addr.host.as_deref().map(lossy) {
        Some(host) => format!("{mailbox}@{host}"),
        None => return None,
    };
    match addr.name.as_deref().map(lossy) {
        Some(name) if !name.is_empty() => Some(format!("{name} <{address}>")),
        _ => Some(address),
    }
}
