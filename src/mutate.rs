//! Flag and location changes on a single message

use crate::error::{Error, Result};
use crate::flag::Flag;
use crate::session::Session;
use imap_proto::{MailboxDatum, Response};
use tracing::{debug, info, warn};

/// Select `mailbox` and add `flag` to message `uid`.
///
/// # Errors
///
/// Returns an error if the SELECT fails or the server refuses the
/// STORE.
pub async fn add_flag(session: &mut Session, mailbox: &str, uid: u32, flag: &Flag) -> Result<()> {
    session.select_mailbox(mailbox).await?;
    store(session, &uid.to_string(), &flag.add_query()).await?;
    debug!("Added {} to UID {} in {}", flag, uid, mailbox);
    Ok(())
}

/// Select `mailbox` and move message `uid` to `destination`.
///
/// Uses `UID MOVE`; servers without MOVE get `UID COPY`, `\Deleted`,
/// and an expunge limited to `uid` instead.
///
/// # Errors
///
/// Returns an error if the SELECT fails or both MOVE and the COPY
/// fallback are rejected.
pub async fn move_message(
    session: &mut Session,
    mailbox: &str,
    uid: u32,
    destination: &str,
) -> Result<()> {
    session.select_mailbox(mailbox).await?;
    let uid_set = uid.to_string();

    let moved = session.imap_mut()?.uid_mv(&uid_set, destination).await;
    match moved {
        Ok(()) => {
            info!("Moved UID {} from {} to {}", uid, mailbox, destination);
            Ok(())
        }
        Err(e) => {
            warn!("UID MOVE rejected ({}), falling back to COPY", e);
            copy_and_expunge(session, uid, destination).await?;
            info!("Copied UID {} from {} to {} and expunged", uid, mailbox, destination);
            Ok(())
        }
    }
}

async fn copy_and_expunge(session: &mut Session, uid: u32, destination: &str) -> Result<()> {
    let uid_set = uid.to_string();

    session
        .imap_mut()?
        .uid_copy(&uid_set, destination)
        .await
        .map_err(|e| Error::Mutation {
            operation: "COPY",
            reason: e.to_string(),
        })?;

    store(session, &uid_set, &Flag::Deleted.add_query()).await?;

    let uid_expunged = session
        .run_checked(&format!("UID EXPUNGE {uid_set}"), |_| {}, |reason| Error::Mutation {
            operation: "UID EXPUNGE",
            reason,
        })
        .await;
    if let Err(e) = uid_expunged {
        warn!("UID EXPUNGE rejected ({}), expunging around other deleted messages", e);
        expunge_only(session, uid).await?;
    }
    Ok(())
}

/// EXPUNGE without UIDPLUS, sparing messages that were already
/// `\Deleted` by clearing the flag first and restoring it afterwards.
async fn expunge_only(session: &mut Session, uid: u32) -> Result<()> {
    let mut others = Vec::new();
    session
        .run_checked(
            "UID SEARCH DELETED",
            |response| {
                if let Response::MailboxData(MailboxDatum::Search(found)) = response {
                    others.extend(found.iter().copied().filter(|&other| other != uid));
                }
            },
            |reason| Error::Mutation {
                operation: "SEARCH",
                reason,
            },
        )
        .await?;

    let others = others
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if !others.is_empty() {
        debug!("Protecting UIDs {} from EXPUNGE", others);
        store(session, &others, "-FLAGS.SILENT (\\Deleted)").await?;
    }

    let expunged = session
        .run_checked("EXPUNGE", |_| {}, |reason| Error::Mutation {
            operation: "EXPUNGE",
            reason,
        })
        .await;

    // The flags go back even when the EXPUNGE failed.
    if !others.is_empty() {
        store(session, &others, "+FLAGS.SILENT (\\Deleted)").await?;
    }
    expunged
}

/// `UID STORE` that fails unless the server completes it with OK.
async fn store(session: &mut Session, uid_set: &str, query: &str) -> Result<()> {
    session
        .run_checked(&format!("UID STORE {uid_set} {query}"), |_| {}, |reason| {
            Error::Mutation {
                operation: "STORE",
                reason,
            }
        })
        .await
}
