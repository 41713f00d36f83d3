//! UID STORE command handler.
//!
//! Modifies `\Seen` and `\Deleted` on messages identified by UID:
//!
//! - `+FLAGS (...)` -- add flags
//! - `-FLAGS (...)` -- remove flags
//! - `FLAGS (...)` -- replace flags
//!
//! Responds with `* N FETCH (UID U FLAGS (...))` per modified message
//! unless `.SILENT` was requested, then the tagged OK.

use super::expand_uids;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

fn apply(current: bool, wanted: bool, kind: &StoreType) -> bool {
    match kind {
        StoreType::Add => current || wanted,
        StoreType::Remove => current && !wanted,
        StoreType::Replace => wanted,
    }
}

/// Handle the UID STORE command. Modifies flags on matching emails.
pub async fn handle_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let refused = mailbox.lock().unwrap().refuse_store;
    if refused {
        let resp = format!("{tag} NO [READ-ONLY] Mailbox is read-only\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    let wants_seen = args.flags.iter().any(|f| matches!(f, Flag::Seen));
    let wants_deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Mutate under lock, write afterwards.
    let updates = {
        let mut mb = mailbox.lock().unwrap();
        let updates = mb.get_folder_mut(folder_name).map(|folder| {
            let max_uid = folder.emails.iter().map(|e| e.uid).max().unwrap_or(0);
            let mut updates = Vec::new();
            for uid in expand_uids(args.sequence_set, max_uid) {
                let Some((idx, email)) = folder
                    .emails
                    .iter_mut()
                    .enumerate()
                    .find(|(_, e)| e.uid == uid)
                else {
                    continue;
                };
                email.seen = apply(email.seen, wants_seen, args.kind);
                email.deleted = apply(email.deleted, wants_deleted, args.kind);
                updates.push(format!(
                    "* {} FETCH (UID {uid} FLAGS {})\r\n",
                    idx + 1,
                    email.flag_list()
                ));
            }
            updates
        });
        drop(mb);
        updates
    };

    let Some(updates) = updates else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    if !matches!(args.response, StoreResponse::Silent) {
        for line in &updates {
            if write_line(stream, line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::handlers::testing::{output, pipe, uid_set};
    use crate::fake_imap::mailbox::MailboxBuilder;

    async fn run(
        uid: u32,
        kind: &StoreType,
        flags: &[Flag<'_>],
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, mut server) = pipe();
        let seq = uid_set(&[uid]);
        let args = StoreArgs {
            sequence_set: &seq,
            kind,
            response: &StoreResponse::Answer,
            flags,
        };
        handle_uid_store("A1", &args, mailbox, selected, &mut server).await;
        output(client, server).await
    }

    fn seen(mb: &Mutex<Mailbox>, uid: u32) -> bool {
        let locked = mb.lock().unwrap();
        let inbox = locked.get_folder("INBOX").unwrap();
        inbox.emails.iter().find(|e| e.uid == uid).unwrap().seen
    }

    #[tokio::test]
    async fn add_seen_flag() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").email(42, false).build());

        let output = run(42, &StoreType::Add, &[Flag::Seen], &mb, Some("INBOX")).await;

        assert!(output.contains("* 1 FETCH (UID 42 FLAGS (\\Seen))"));
        assert!(output.ends_with("A1 OK STORE completed\r\n"));
        assert!(seen(&mb, 42));
    }

    #[tokio::test]
    async fn remove_seen_flag() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").email(1, true).build());
        run(1, &StoreType::Remove, &[Flag::Seen], &mb, Some("INBOX")).await;
        assert!(!seen(&mb, 1));
    }

    #[tokio::test]
    async fn add_deleted_keeps_seen() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").email(1, true).build());

        let output = run(1, &StoreType::Add, &[Flag::Deleted], &mb, Some("INBOX")).await;

        assert!(output.contains("FLAGS (\\Seen \\Deleted)"));
        assert!(seen(&mb, 1));
        assert!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].deleted);
    }

    #[tokio::test]
    async fn unknown_uid_changes_nothing() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").email(1, false).build());
        let output = run(5, &StoreType::Add, &[Flag::Seen], &mb, Some("INBOX")).await;
        assert_eq!(output, "A1 OK STORE completed\r\n");
        assert!(!seen(&mb, 1));
    }

    #[tokio::test]
    async fn read_only_mailbox_refuses_store() {
        let mb = Mutex::new(
            MailboxBuilder::new()
                .read_only()
                .folder("INBOX")
                .email(1, false)
                .build(),
        );

        let output = run(1, &StoreType::Add, &[Flag::Seen], &mb, Some("INBOX")).await;

        assert_eq!(output, "A1 NO [READ-ONLY] Mailbox is read-only\r\n");
        assert!(!seen(&mb, 1));
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());
        let output = run(1, &StoreType::Add, &[Flag::Seen], &mb, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }
}
