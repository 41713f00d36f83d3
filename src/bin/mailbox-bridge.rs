#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! HTTP server and one-shot command line for mailbox-bridge

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use mailbox_bridge::{BridgeConfig, Dispatcher, split_list};
use rustls_pemfile::{certs, private_key};
use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mailbox-bridge")]
#[command(about = "Stateless HTTP-to-IMAP bridge")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Serve requests over HTTP, or HTTPS when certificates are set
    Serve,

    /// Run a single action and print its JSON response
    Run {
        /// login, hierarchy, getMail, getAttachment, setRead or moveMail
        action: String,

        /// IMAP login
        #[arg(long)]
        id: String,

        /// IMAP password
        #[arg(long)]
        password: String,

        /// Source mailbox
        #[arg(long = "box")]
        mailbox: Option<String>,

        /// Message UID
        #[arg(long)]
        mail_id: Option<String>,

        /// Destination mailbox for moveMail
        #[arg(long)]
        new_box: Option<String>,
    },
}

/// Listener settings, read from the environment.
///
/// - `SERVER_PORT` (required)
/// - `SERVER_BIND` (default: `0.0.0.0`)
/// - `ALLOWED_ORIGINS` (comma separated; `*` allows any origin)
/// - `SSL_FULLCHAIN` and `SSL_PRIVATEKEY` (PEM files, both or neither)
struct ServerConfig {
    addr: SocketAddr,
    allowed_origins: Vec<String>,
    tls: Option<TlsFiles>,
}

struct TlsFiles {
    fullchain: PathBuf,
    private_key: PathBuf,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port: u16 = lookup("SERVER_PORT")
            .context("SERVER_PORT not set")?
            .parse()
            .context("Invalid SERVER_PORT")?;

        let bind: IpAddr = match lookup("SERVER_BIND").filter(|v| !v.trim().is_empty()) {
            Some(value) => value.trim().parse().context("Invalid SERVER_BIND")?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if allowed_origins.is_empty() {
            warn!("ALLOWED_ORIGINS is empty, every request will be refused");
        }

        let tls = match (lookup("SSL_FULLCHAIN"), lookup("SSL_PRIVATEKEY")) {
            (Some(fullchain), Some(private_key)) => Some(TlsFiles {
                fullchain: fullchain.into(),
                private_key: private_key.into(),
            }),
            (None, None) => None,
            _ => bail!("SSL_FULLCHAIN and SSL_PRIVATEKEY must be set together"),
        };

        Ok(Self {
            addr: SocketAddr::new(bind, port),
            allowed_origins,
            tls,
        })
    }

    fn allows(&self, origin: Option<&str>) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || Some(allowed.as_str()) == origin)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = BridgeConfig::from_env()?;
    let dispatcher = Dispatcher::new(config);

    match args.command {
        Command::Serve => {
            let server = ServerConfig::from_env()?;
            serve(dispatcher, server).await
        }
        Command::Run {
            action,
            id,
            password,
            mailbox,
            mail_id,
            new_box,
        } => {
            let mut params = vec![
                ("action", action),
                ("id", id),
                ("password", password),
            ];
            params.extend(mailbox.map(|v| ("box", v)));
            params.extend(mail_id.map(|v| ("mailId", v)));
            params.extend(new_box.map(|v| ("newBox", v)));

            let response = dispatcher.handle(params).await;
            if args.pretty {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.to_json());
            }

            if !response.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn tls_acceptor(files: &TlsFiles) -> anyhow::Result<TlsAcceptor> {
    let chain = certs(&mut BufReader::new(
        File::open(&files.fullchain)
            .with_context(|| format!("Cannot open {}", files.fullchain.display()))?,
    ))
    .collect::<Result<Vec<_>, _>>()
    .context("Invalid certificate chain")?;

    let key = private_key(&mut BufReader::new(
        File::open(&files.private_key)
            .with_context(|| format!("Cannot open {}", files.private_key.display()))?,
    ))
    .context("Invalid private key")?
    .context("No private key found")?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

async fn serve(dispatcher: Dispatcher, server: ServerConfig) -> anyhow::Result<()> {
    let acceptor = server.tls.as_ref().map(tls_acceptor).transpose()?;
    let listener = TcpListener::bind(server.addr)
        .await
        .with_context(|| format!("Cannot bind {}", server.addr))?;
    info!(
        "Listening on {} ({})",
        server.addr,
        if acceptor.is_some() { "https" } else { "http" }
    );

    let server = Arc::new(server);
    loop {
        let (socket, remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let dispatcher = dispatcher.clone();
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                let server = Arc::clone(&server);
                async move { Ok::<_, Infallible>(route(&dispatcher, &server, req).await) }
            });

            let served = match acceptor {
                Some(acceptor) => match acceptor.accept(socket).await {
                    Ok(stream) => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                    }
                    Err(e) => {
                        warn!("TLS handshake with {} failed: {}", remote, e);
                        return;
                    }
                },
                None => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(socket), service)
                        .await
                }
            };

            if let Err(e) = served {
                warn!("Connection from {} failed: {}", remote, e);
            }
        });
    }
}

async fn route(
    dispatcher: &Dispatcher,
    server: &ServerConfig,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    // The query string carries the password; only the path is logged.
    info!("{} {}", req.method(), req.uri().path());

    let origin = req.headers().get(header::ORIGIN).cloned();
    let origin_str = origin.as_ref().and_then(|v| v.to_str().ok());

    if req.method() != Method::GET {
        return plain(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{} is not allowed for the request.", req.method()),
        );
    }

    if !server.allows(origin_str) {
        return plain(
            StatusCode::FORBIDDEN,
            format!(
                "Origin {} is not allowed for the request.",
                origin_str.unwrap_or("<none>")
            ),
        );
    }

    let query = req.uri().query().unwrap_or_default();
    let params = form_urlencoded::parse(query.as_bytes()).into_owned();
    let response = dispatcher.handle(params).await;

    let mut reply = Response::new(Full::new(Bytes::from(response.to_json())));
    reply.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    with_cors(reply, origin)
}

fn plain(status: StatusCode, message: String) -> Response<Full<Bytes>> {
    let mut reply = Response::new(Full::new(Bytes::from(message)));
    *reply.status_mut() = status;
    reply.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    with_cors(reply, None)
}

fn with_cors(
    mut reply: Response<Full<Bytes>>,
    origin: Option<HeaderValue>,
) -> Response<Full<Bytes>> {
    let headers = reply.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    reply
}
