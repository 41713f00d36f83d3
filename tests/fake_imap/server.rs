//! TCP listener and per-connection command loop of the fake server
//!
//! Two ways into TLS are offered, matching the two `IMAP_SECURITY`
//! settings of the bridge:
//!
//! ```text
//!   implicit TLS:  accept -> TLS handshake -> "* OK" greeting -> LOGIN ...
//!   STARTTLS:      accept -> "* OK" greeting -> STARTTLS -> TLS handshake -> LOGIN ...
//! ```
//!
//! After the handshake each line is one tagged command (`A0003 SELECT
//! "INBOX"`). It is appended to `Mailbox::commands` before anything
//! else happens, so tests can assert on exactly what the bridge sent,
//! rejected commands included.

use super::handlers::{
    FetchKind, StoreArgs, handle_expunge, handle_list, handle_login, handle_logout,
    handle_select, handle_uid_copy, handle_uid_fetch, handle_uid_move, handle_uid_search,
    handle_uid_store, parse_move,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// How a fresh connection reaches TLS.
#[derive(Debug, Clone, Copy)]
enum Mode {
    ImplicitTls,
    StartTls,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so clients must be configured to accept invalid
/// certificates.
pub struct FakeImapServer {
    port: u16,
    state: Arc<Mutex<Mailbox>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a server that expects TLS from the first byte (port 993
    /// style).
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Mode::ImplicitTls).await
    }

    /// Start a server that greets in plain text and upgrades on
    /// STARTTLS (port 143 style).
    pub async fn start_starttls(mailbox: Mailbox) -> Self {
        Self::spawn(mailbox, Mode::StartTls).await
    }

    async fn spawn(mailbox: Mailbox, mode: Mode) -> Self {
        // Several tests may race to install the provider; losing is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let state = Arc::new(Mutex::new(mailbox));

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = shared.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, mode, &mailbox).await;
                });
            }
        });

        Self {
            port,
            state,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Copy of the current server state.
    pub fn snapshot(&self) -> Mailbox {
        self.state.lock().unwrap().clone()
    }

    /// Every command line received so far.
    pub fn commands(&self) -> Vec<String> {
        self.snapshot().commands
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    mode: Mode,
    mailbox: &Mutex<Mailbox>,
) {
    match mode {
        Mode::ImplicitTls => {
            let Ok(tls_stream) = acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls_stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }
            handle_imap_session(reader, mailbox).await;
        }
        Mode::StartTls => {
            let mut reader = BufReader::new(stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }
            if !await_starttls(&mut reader).await {
                return;
            }
            let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
                return;
            };
            handle_imap_session(BufReader::new(tls_stream), mailbox).await;
        }
    }
}

/// Read one plain-text command and accept it only if it is STARTTLS.
async fn await_starttls(reader: &mut BufReader<TcpStream>) -> bool {
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return false;
    }
    let mut parts = line.split_whitespace();
    let tag = parts.next().unwrap_or("*").to_string();
    if !parts.next().is_some_and(|c| c.eq_ignore_ascii_case("STARTTLS")) {
        let _ = write_line(reader, &format!("{tag} BAD Expected STARTTLS\r\n")).await;
        return false;
    }
    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    write_line(reader, &resp).await.is_ok()
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the IMAP command loop over an established TLS stream.
///
/// `UID MOVE` is recognised from the raw line; everything else goes
/// through `imap-codec`'s `CommandCodec`. Until LOGIN succeeds only
/// LOGIN and LOGOUT are accepted.
///
/// Read handlers receive a snapshot (`Mailbox` clone) taken under
/// lock. Write handlers receive `&Mutex<Mailbox>` and lock briefly
/// to mutate state.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    mailbox: &Mutex<Mailbox>,
) {
    let mut selected_folder: Option<String> = None;
    let mut authenticated = false;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        mailbox.lock().unwrap().commands.push(trimmed.to_string());

        if let Some(command) = parse_move(trimmed) {
            if authenticated {
                handle_uid_move(&command, mailbox, selected_folder.as_deref(), &mut reader).await;
            } else {
                let resp = format!("{} BAD Not authenticated\r\n", command.tag);
                let _ = write_line(&mut reader, &resp).await;
            }
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();

        if !authenticated
            && !matches!(command.body, CommandBody::Login { .. } | CommandBody::Logout)
        {
            let resp = format!("{tag} BAD Not authenticated\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        // Snapshot for read-only handlers.
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Login { .. } => {
                authenticated = handle_login(tag, trimmed, mailbox, &mut reader).await;
            }
            CommandBody::List { .. } => {
                handle_list(tag, &snap, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Search {
                criteria,
                uid: true,
                ..
            } => {
                handle_uid_search(
                    tag,
                    criteria.as_ref(),
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                let kind = FetchKind::from_line(trimmed);
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    &kind,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: true,
                ref kind,
                ref response,
                ref flags,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(tag, &args, mailbox, selected_folder.as_deref(), &mut reader)
                    .await;
            }
            CommandBody::Copy {
                ref sequence_set,
                mailbox: ref dest_mb,
                uid: true,
                ..
            } => {
                let dest_name = mailbox_name(dest_mb);
                handle_uid_copy(
                    tag,
                    sequence_set,
                    &dest_name,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, None, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::ExpungeUid { ref sequence_set } => {
                handle_expunge(
                    tag,
                    Some(sequence_set),
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                handle_logout(tag, mailbox, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
