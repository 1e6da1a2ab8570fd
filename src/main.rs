//! Thin CLI front-end (§6): mutually exclusive `--listen`/`--send`, optional
//! `--mode`, `--text`, `--cert`/`--key` for TLS, and a positional `FILE...`
//! whose meaning depends on direction, matching `main.py`'s argparse surface
//! one-for-one (`args.file[0]` is the drop directory on `--listen`; `args.file`
//! is either files to send or words to join into a text message on `--send`).

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use dropwire::dukto::DuktoEngine;
use dropwire::nitroshare::NitroShareEngine;
use dropwire::observer::{EngineObserver, TransferObserver};
use dropwire::orchestrator::Orchestrator;
use dropwire::peer::{Node, Protocol};
use dropwire::sender::{self, SendOptions, SendTarget};
use dropwire::sink::{DropTarget, FsReceiverSink};
use dropwire::transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Dukto,
    Nitroshare,
}

/// A LAN file/text drop daemon interoperable with Dukto and NitroShare.
#[derive(Parser, Debug)]
#[command(name = "dropwire", version, about)]
struct Cli {
    /// Output debug-level log messages.
    #[arg(short, long)]
    verbose: bool,

    /// Listen for incoming transfers on `ip[:tcp_port[:udp_port]]`.
    #[arg(long, value_name = "ip[:tcp_port[:udp_port]]", conflicts_with = "send")]
    listen: Option<String>,

    /// Send to a peer at `ip[:tcp_port]`.
    #[arg(long, value_name = "ip[:tcp_port]", conflicts_with = "listen")]
    send: Option<String>,

    /// Protocol to speak. Required for `--send`, and for `--listen` whenever
    /// the listen spec names a non-default port.
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Treat `FILE` as words of a text message to send (Dukto only).
    #[arg(long)]
    text: bool,

    /// TLS certificate file (PEM).
    #[arg(long, value_name = "cert file")]
    cert: Option<PathBuf>,

    /// TLS private key file (PEM).
    #[arg(long, value_name = "key file")]
    key: Option<PathBuf>,

    /// File(s)/directory to send, or on `--listen`, the directory files are
    /// saved into ("-" means standard output).
    #[arg(required = true, value_name = "FILE")]
    file: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if cli.listen.is_none() && cli.send.is_none() {
        bail!("one of --listen or --send is required");
    }

    let tls_acceptor = match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => Some(transport::server_acceptor(cert, key)?),
        (None, None) => None,
        _ => bail!("--cert and --key must be given together"),
    };
    let tls_connector = if cli.cert.is_some() || cli.key.is_some() { Some(transport::client_connector()) } else { None };

    if let Some(listen_spec) = &cli.listen {
        if listen_spec.contains(':') && cli.mode.is_none() {
            bail!("the following arguments are required: --mode");
        }
        return listen(&cli, listen_spec, tls_acceptor).await;
    }

    if let Some(send_spec) = &cli.send {
        let Some(mode) = cli.mode else {
            bail!("the following arguments are required: --mode");
        };
        return send(&cli, send_spec, mode, tls_connector).await;
    }

    unreachable!("clap enforces exactly one of --listen/--send via conflicts_with and the check above")
}

struct LoggingObserver;

impl EngineObserver for LoggingObserver {
    fn add_node(&self, node: &Node) {
        tracing::info!(ip = %node.ip, tcp_port = node.tcp_port, "peer discovered");
    }

    fn remove_node(&self, node: &Node) {
        tracing::info!(ip = %node.ip, "peer gone");
    }
}

impl TransferObserver for LoggingObserver {
    fn recv_finish_file(&self, from: std::net::SocketAddr, path: &str, md5_hex: Option<&str>) {
        match md5_hex {
            Some(digest) => eprintln!("{digest}  {path}"),
            None => eprintln!("{path}{}", std::path::MAIN_SEPARATOR),
        }
        let _ = from;
    }

    fn recv_finish_text(&self, from: std::net::SocketAddr, text: &str) {
        tracing::info!(%from, "TEXT: {text}");
    }

    fn recv_finish(&self, from: std::net::SocketAddr, reason: &str) {
        tracing::info!(%from, reason, "transfer finished");
    }

    fn send_finish_file(&self, path: &str, md5_hex: Option<&str>) {
        match md5_hex {
            Some(digest) => eprintln!("{digest}  {path}"),
            None => eprintln!("{path}{}", std::path::MAIN_SEPARATOR),
        }
    }

    fn send_finish(&self, result: &str) {
        tracing::info!(result, "send finished");
    }
}

/// Parses `ip[:tcp_port[:udp_port]]` into its three optional components.
fn parse_listen_spec(spec: &str) -> Result<(Ipv4Addr, Option<u16>, Option<u16>)> {
    let mut parts = spec.split(':');
    let ip: Ipv4Addr = parts.next().unwrap_or_default().parse().context("invalid IP in listen spec")?;
    let tcp_port = parts.next().map(|p| p.parse()).transpose().context("invalid tcp_port in listen spec")?;
    let udp_port = parts.next().map(|p| p.parse()).transpose().context("invalid udp_port in listen spec")?;
    Ok((ip, tcp_port, udp_port))
}

/// Parses `ip[:tcp_port]` for `--send` (no udp_port; the sender connects
/// directly, it never needs to bind a presence socket).
fn parse_send_spec(spec: &str) -> Result<(Ipv4Addr, Option<u16>)> {
    let mut parts = spec.split(':');
    let ip: Ipv4Addr = parts.next().unwrap_or_default().parse().context("invalid IP in send spec")?;
    let tcp_port = parts.next().map(|p| p.parse()).transpose().context("invalid tcp_port in send spec")?;
    Ok((ip, tcp_port))
}

async fn listen(cli: &Cli, listen_spec: &str, tls_acceptor: Option<tokio_rustls::TlsAcceptor>) -> Result<ExitCode> {
    let (ip, tcp_port, udp_port) = parse_listen_spec(listen_spec)?;

    let drop_target = match cli.file.first().map(String::as_str) {
        Some("-") => DropTarget::Stdout,
        Some(dir) => DropTarget::Directory(PathBuf::from(dir)),
        None => bail!("FILE (drop directory) is required"),
    };

    let logging_observer = Arc::new(LoggingObserver);
    let sink = Arc::new(FsReceiverSink::new(drop_target, logging_observer.clone())?);

    let node_name = hostname_or_default();
    let identity = dropwire::dukto::wire::signature(&username_or_default(), &node_name, std::env::consts::OS);
    let uuid = uuid::Uuid::new_v4().to_string();

    let dukto_engine = if cli.mode.is_none() || cli.mode == Some(Mode::Dukto) {
        Some(
            DuktoEngine::bind(ip, tcp_port, udp_port, identity, tls_acceptor.clone(), logging_observer.clone(), sink.clone())
                .await
                .context("failed to bind dukto engine")?,
        )
    } else {
        None
    };

    let nitroshare_engine = if cli.mode.is_none() || cli.mode == Some(Mode::Nitroshare) {
        Some(
            NitroShareEngine::bind(
                ip,
                tcp_port,
                udp_port,
                uuid,
                node_name,
                std::env::consts::OS.to_string(),
                tls_acceptor,
                logging_observer,
                sink,
            )
            .await
            .context("failed to bind nitroshare engine")?,
        )
    } else {
        None
    };

    let orchestrator = Orchestrator::new(dukto_engine, nitroshare_engine);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::select! {
        _ = orchestrator.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn send(cli: &Cli, send_spec: &str, mode: Mode, tls_connector: Option<tokio_rustls::TlsConnector>) -> Result<ExitCode> {
    let (ip, tcp_port) = parse_send_spec(send_spec)?;
    let protocol = match mode {
        Mode::Dukto => Protocol::Dukto,
        Mode::Nitroshare => Protocol::NitroShare,
    };
    let default_port = match protocol {
        Protocol::Dukto => dropwire::dukto::wire::DEFAULT_TCP_PORT,
        Protocol::NitroShare => dropwire::nitroshare::wire::DEFAULT_TCP_PORT,
    };

    let target = SendTarget {
        protocol,
        addr: std::net::SocketAddr::new(ip.into(), tcp_port.unwrap_or(default_port)),
        node_name: hostname_or_default(),
    };
    let options = SendOptions { tls: tls_connector, chunk_size: None };
    let observer = Arc::new(LoggingObserver);

    let result = if cli.text {
        let text = cli.file.join(" ");
        sender::send_text(&target, &options, &text).await
    } else {
        let paths = cli.file.iter().map(PathBuf::from).collect::<Vec<_>>();
        sender::send_files(&target, &options, &paths, observer).await
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::from(2))
        }
    }
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "dropwire".to_string())
}

fn username_or_default() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
