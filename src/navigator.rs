//! Mailbox hierarchy and message summaries
//!
//! Lists the selectable mailboxes of the account and, per mailbox, the
//! UID and flags of every message, newest first.

use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::session::Session;
use async_imap::types::NameAttribute;
use futures::StreamExt;
use imap_proto::{AttributeValue, MailboxDatum, Response};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::{debug, info, warn};

/// UID and flags of one message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MessageSummary {
    pub id: u32,
    pub flags: Vec<Flag>,
}

/// Mailbox name to message summaries, in server listing order.
///
/// Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    entries: Vec<(String, Vec<MessageSummary>)>,
}

impl Hierarchy {
    pub fn insert(&mut self, mailbox: String, summaries: Vec<MessageSummary>) {
        self.entries.push((mailbox, summaries));
    }

    #[must_use]
    pub fn get(&self, mailbox: &str) -> Option<&[MessageSummary]> {
        self.entries
            .iter()
            .find(|(name, _)| name == mailbox)
            .map(|(_, s)| s.as_slice())
    }

    /// Mailbox names, in listing order.
    pub fn mailboxes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Hierarchy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, summaries) in &self.entries {
            map.serialize_entry(name, summaries)?;
        }
        map.end()
    }
}

/// List selectable mailbox names, minus the excluded ones.
///
/// Nested mailboxes appear under their full hierarchical name; the tree
/// shape itself is not kept.
///
/// # Errors
///
/// Returns an error if the LIST command fails.
pub async fn list_mailboxes(session: &mut Session, excluded: &[String]) -> Result<Vec<String>> {
    let imap = session.imap_mut()?;

    let mut name_stream = imap
        .list(Some(""), Some("*"))
        .await
        .map_err(|e| Error::Imap(format!("List mailboxes failed: {e}")))?;

    let mut names = Vec::new();
    while let Some(item) = name_stream.next().await {
        let name = item.map_err(|e| Error::Imap(format!("List mailboxes failed: {e}")))?;
        if name
            .attributes()
            .iter()
            .any(|a| matches!(a, NameAttribute::NoSelect))
        {
            debug!("Skipping non-selectable {}", name.name());
            continue;
        }
        names.push(name.name().to_string());
    }
    drop(name_stream);

    Ok(filter_excluded(names, excluded))
}

fn filter_excluded(names: Vec<String>, excluded: &[String]) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !excluded.iter().any(|ex| ex == name))
        .collect()
}

/// Select `mailbox` and return every message summary, most recent
/// first.
///
/// # Errors
///
/// Returns an error if the SELECT fails or the server refuses the
/// SEARCH or FETCH.
pub async fn list_message_summaries(
    session: &mut Session,
    mailbox: &str,
) -> Result<Vec<MessageSummary>> {
    session.select_mailbox(mailbox).await?;

    let rejected = |reason: String| Error::Search(format!("{mailbox}: {reason}"));

    let mut uids = Vec::new();
    session
        .run_checked(
            "UID SEARCH ALL",
            |response| {
                if let Response::MailboxData(MailboxDatum::Search(found)) = response {
                    uids.extend_from_slice(found);
                }
            },
            rejected,
        )
        .await?;

    if uids.is_empty() {
        return Ok(vec![]);
    }
    uids.sort_unstable();
    uids.dedup();

    let command = format!("UID FETCH {} (UID FLAGS)", uid_ranges(&uids));
    let mut summaries = Vec::with_capacity(uids.len());
    session
        .run_checked(
            &command,
            |response| {
                if let Response::Fetch(_, attributes) = response {
                    summaries.extend(summary_from_attributes(attributes));
                }
            },
            rejected,
        )
        .await?;

    debug!("{}: {} of {} messages fetched", mailbox, summaries.len(), uids.len());
    Ok(newest_first(summaries))
}

/// Build a summary from one FETCH response; `None` without a UID.
fn summary_from_attributes(attributes: &[AttributeValue<'_>]) -> Option<MessageSummary> {
    let mut id = None;
    let mut flags = Vec::new();
    for attribute in attributes {
        match attribute {
            AttributeValue::Uid(uid) => id = Some(*uid),
            AttributeValue::Flags(names) => {
                flags = names.iter().map(|name| Flag::from(name.as_ref())).collect();
            }
            _ => {}
        }
    }
    Some(MessageSummary { id: id?, flags })
}

/// Collapse sorted, deduplicated UIDs into a compact set such as
/// `1:3,7,9:10`.
fn uid_ranges(sorted: &[u32]) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for &uid in sorted {
        match ranges.last_mut() {
            Some((_, end)) if end.checked_add(1) == Some(uid) => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }
    ranges
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Order ascending by UID, then reverse.
fn newest_first(mut summaries: Vec<MessageSummary>) -> Vec<MessageSummary> {
    summaries.sort_unstable_by_key(|s| s.id);
    summaries.dedup_by_key(|s| s.id);
    summaries.reverse();
    summaries
}

/// Summaries of every listed mailbox.
///
/// A mailbox whose summaries cannot be read is left out instead of
/// failing the whole listing.
///
/// # Errors
///
/// Returns an error only if the mailbox listing itself fails.
pub async fn get_hierarchy(session: &mut Session, excluded: &[String]) -> Result<Hierarchy> {
    let mailboxes = list_mailboxes(session, excluded).await?;
    info!("Reading {} mailboxes", mailboxes.len());

    let mut hierarchy = Hierarchy::default();
    for mailbox in mailboxes {
        match list_message_summaries(session, &mailbox).await {
            Ok(summaries) => hierarchy.insert(mailbox, summaries),
            Err(e) => warn!("Omitting {} from hierarchy: {}", mailbox, e),
        }
    }

    Ok(hierarchy)
}
