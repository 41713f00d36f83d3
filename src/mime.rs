//! MIME part resolution
//!
//! Flattens a [`BodyNode`] tree into IMAP-addressable leaf parts,
//! classifies each part as body text, attachment, or neither, and
//! downloads the selected parts one after another.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::structure::{BodyNode, FetchedMessage, PartInfo};
use base64::Engine;
use imap_proto::types::{AttributeValue, ContentEncoding, Response, SectionPath};
use serde::{Serialize, Serializer};
use std::fmt;
use tracing::{debug, warn};

/// Content-Transfer-Encoding of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    Other(String),
}

impl From<&ContentEncoding<'_>> for TransferEncoding {
    fn from(encoding: &ContentEncoding<'_>) -> Self {
        match encoding {
            ContentEncoding::SevenBit => Self::SevenBit,
            ContentEncoding::EightBit => Self::EightBit,
            ContentEncoding::Binary => Self::Binary,
            ContentEncoding::Base64 => Self::Base64,
            ContentEncoding::QuotedPrintable => Self::QuotedPrintable,
            ContentEncoding::Other(other) => Self::Other(other.to_string()),
        }
    }
}

impl TransferEncoding {
    /// Undo the transfer encoding of a downloaded part.
    ///
    /// Identity encodings (and unknown ones) return the bytes as-is.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the payload is malformed.
    pub fn decode(&self, raw: &[u8]) -> std::result::Result<Vec<u8>, String> {
        match self {
            Self::Base64 => {
                let compact: Vec<u8> = raw
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact)
                    .map_err(|e| format!("invalid base64: {e}"))
            }
            Self::QuotedPrintable => {
                quoted_printable::decode(raw, quoted_printable::ParseMode::Robust)
                    .map_err(|e| format!("invalid quoted-printable: {e}"))
            }
            Self::SevenBit | Self::EightBit | Self::Binary | Self::Other(_) => Ok(raw.to_vec()),
        }
    }
}

/// A leaf part addressed by its IMAP part number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Part number components: `[2, 1]` is part `2.1`.
    pub path: Vec<u32>,
    pub info: PartInfo,
}

impl MimePart {
    /// Dotted part number used in `BODY[...]`.
    #[must_use]
    pub fn id(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Attachment file name: the disposition `filename`, else the
    /// Content-Type `name`.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.info
            .disposition
            .as_ref()
            .and_then(|d| d.param("filename"))
            .or_else(|| self.info.param("name"))
    }
}

/// Walk the structure into leaf parts, in document order.
///
/// A single-part message yields part `1`. A missing or empty
/// structure yields no parts.
#[must_use]
pub fn flatten(structure: Option<&BodyNode>) -> Vec<MimePart> {
    let mut parts = Vec::new();
    match structure {
        None => {}
        Some(BodyNode::Part(info)) => parts.push(MimePart {
            path: vec![1],
            info: info.clone(),
        }),
        Some(BodyNode::Multipart { children, .. }) => walk(children, &[], &mut parts),
    }
    parts
}

fn walk(children: &[BodyNode], prefix: &[u32], parts: &mut Vec<MimePart>) {
    for (index, child) in (1u32..).zip(children) {
        let mut path = prefix.to_vec();
        path.push(index);
        match child {
            BodyNode::Part(info) => parts.push(MimePart {
                path,
                info: info.clone(),
            }),
            BodyNode::Multipart { children, .. } => walk(children, &path, parts),
        }
    }
}

/// Body text flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Plain,
    Html,
}

/// What a part is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartClass {
    Inline(BodyKind),
    Attachment,
    Other,
}

impl fmt::Display for PartClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inline(BodyKind::Plain) => "PLAIN",
            Self::Inline(BodyKind::Html) => "HTML",
            Self::Attachment => "ATTACHMENT",
            Self::Other => "OTHER",
        })
    }
}

/// Attachment disposition wins; otherwise PLAIN and HTML subtypes are
/// body text; everything else is ignored.
#[must_use]
pub fn classify(part: &MimePart) -> PartClass {
    let is_attachment = part
        .info
        .disposition
        .as_ref()
        .is_some_and(|d| d.kind.eq_ignore_ascii_case("attachment"));
    if is_attachment {
        return PartClass::Attachment;
    }

    if part.info.subtype.eq_ignore_ascii_case("plain") {
        PartClass::Inline(BodyKind::Plain)
    } else if part.info.subtype.eq_ignore_ascii_case("html") {
        PartClass::Inline(BodyKind::Html)
    } else {
        PartClass::Other
    }
}

/// A named attachment, optionally with its decoded content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: Option<String>,
    /// Upper-cased media subtype (`PDF`, `PNG`, ...).
    pub file_type: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_base64"
    )]
    pub data: Option<Vec<u8>>,
}

impl Attachment {
    fn describe(part: &MimePart, data: Option<Vec<u8>>) -> Self {
        Self {
            filename: part.filename().map(ToString::to_string),
            file_type: part.info.subtype.to_ascii_uppercase(),
            data,
        }
    }
}

#[allow(clippy::ref_option)]
fn serialize_base64<S: Serializer>(
    data: &Option<Vec<u8>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match data {
        Some(bytes) => {
            serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        None => serializer.serialize_none(),
    }
}

/// Attachment names and types without downloading anything.
#[must_use]
pub fn attachment_metadata(parts: &[MimePart]) -> Vec<Attachment> {
    parts
        .iter()
        .filter(|p| classify(p) == PartClass::Attachment)
        .map(|p| Attachment::describe(p, None))
        .collect()
}

/// Downloaded content, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Downloads {
    pub plain: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Download every part whose class is in `wanted`.
///
/// Attachments accumulate and a failed attachment is skipped. A PLAIN
/// or HTML part replaces any earlier one of the same kind, and failing
/// to download it fails the whole call.
///
/// # Errors
///
/// Returns an error if the mailbox cannot be selected or a body part
/// cannot be downloaded.
pub async fn download_selected(
    session: &mut Session,
    message: &FetchedMessage,
    parts: &[MimePart],
    wanted: &[PartClass],
) -> Result<Downloads> {
    session.select_mailbox(&message.mailbox).await?;

    let mut downloads = Downloads::default();
    for part in parts {
        let class = classify(part);
        if !wanted.contains(&class) {
            continue;
        }
        debug!("Downloading part {} ({}) of UID {}", part.id(), class, message.uid);

        match class {
            PartClass::Attachment => match download_part(session, message.uid, part).await {
                Ok(data) => downloads
                    .attachments
                    .push(Attachment::describe(part, Some(data))),
                Err(e) => warn!("Skipping attachment of UID {}: {}", message.uid, e),
            },
            PartClass::Inline(kind) => {
                let data = download_part(session, message.uid, part).await?;
                let text = decode_text(part, &data);
                match kind {
                    BodyKind::Plain => downloads.plain = Some(text),
                    BodyKind::Html => downloads.html = Some(text),
                }
            }
            PartClass::Other => {}
        }
    }

    Ok(downloads)
}

/// `UID FETCH <uid> BODY.PEEK[<part>]` and undo the transfer encoding.
async fn download_part(session: &mut Session, uid: u32, part: &MimePart) -> Result<Vec<u8>> {
    let part_error = |reason: String| Error::Part {
        part: part.id(),
        reason,
    };

    let command = format!("UID FETCH {uid} BODY.PEEK[{}]", part.id());
    let section = SectionPath::Part(part.path.clone(), None);
    let mut raw = None;
    session
        .run_checked(
            &command,
            |response| {
                if let Response::Fetch(_, attributes) = response
                    && raw.is_none()
                    && attributes.contains(&AttributeValue::Uid(uid))
                {
                    raw = section_data(attributes, &section);
                }
            },
            part_error,
        )
        .await?;

    let raw = raw.ok_or_else(|| part_error("server returned no content".into()))?;
    part.info.encoding.decode(&raw).map_err(part_error)
}

fn section_data(attributes: &[AttributeValue<'_>], wanted: &SectionPath) -> Option<Vec<u8>> {
    attributes.iter().find_map(|attribute| match attribute {
        AttributeValue::BodySection {
            section: Some(section),
            data: Some(data),
            ..
        } if section == wanted => Some(data.to_vec()),
        _ => None,
    })
}

/// Decode body text using the part's charset, falling back to UTF-8.
fn decode_text(part: &MimePart, data: &[u8]) -> String {
    let encoding = part
        .info
        .param("charset")
        .and_then(|label| encoding_rs::Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (text, _, _) = encoding.decode(data);
    text.into_owned()
}
