//! Sender-side top-level entry points (spec Component E). Ties together
//! directory enumeration (`walk`), the TCP connect + optional TLS handshake,
//! and protocol-specific framing (`dukto::client` / `nitroshare::client`).
//!
//! Grounded in `original_source/ndrop/netdrop.py`'s `NetDropClient`: one
//! object that walks the argument list, opens a single connection, and
//! drives either transport's `send_files`/`send_text`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::error::TransferError;
use crate::network;
use crate::observer::TransferObserver;
use crate::peer::Protocol;
use crate::transport::{self, BoxedStream};
use crate::walk;

/// How to reach the peer and which protocol to speak to it.
pub struct SendTarget {
    pub protocol: Protocol,
    pub addr: SocketAddr,
    /// Required for TLS (server name / SNI) and, for NitroShare, included in
    /// the transfer header the same way the donor's `get_platform_name()` is.
    pub node_name: String,
}

/// TLS is optional and symmetric with the listen side (§6): if a connector
/// is supplied the stream is upgraded before any protocol bytes are sent.
#[derive(Default)]
pub struct SendOptions {
    pub tls: Option<tokio_rustls::TlsConnector>,
    pub chunk_size: Option<usize>,
}

/// Outbound socket timeout (§7: "5 s outbound").
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

async fn connect(target: &SendTarget, options: &SendOptions) -> Result<BoxedStream, TransferError> {
    let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target.addr))
        .await
        .map_err(|_| TransferError::Timeout)??;
    match &options.tls {
        Some(connector) => transport::connect_tls(connector, tcp, &target.addr.ip().to_string()).await,
        None => Ok(Box::new(tcp)),
    }
}

/// Sends a text snippet to `target`. Dukto represents text as a regular file
/// transfer whose name is a reserved sentinel (§4.B); NitroShare has no text
/// frame at all in the wire protocol it must stay bit-compatible with (§9),
/// so this rejects NitroShare targets rather than inventing an extension.
pub async fn send_text(target: &SendTarget, options: &SendOptions, text: &str) -> Result<(), TransferError> {
    match target.protocol {
        Protocol::Dukto => {
            let mut stream = connect(target, options).await?;
            crate::dukto::client::send_text(&mut stream, text).await?;
            Ok(())
        }
        Protocol::NitroShare => Err(TransferError::Framing(crate::error::FramingError::Malformed(
            "nitroshare has no text-transfer frame; send a file instead".into(),
        ))),
    }
}

/// Walks `paths`, connects to `target`, and streams every entry across,
/// reporting progress through `observer`. Calls `observer.send_finish` with
/// `"done"` on success or the error text otherwise (§6).
pub async fn send_files(
    target: &SendTarget,
    options: &SendOptions,
    paths: &[PathBuf],
    observer: Arc<dyn TransferObserver>,
) -> Result<(), TransferError> {
    let result = send_files_inner(target, options, paths, observer.as_ref()).await;
    match &result {
        Ok(()) => observer.send_finish("done"),
        Err(err) => observer.send_finish(&err.to_string()),
    }
    result
}

async fn send_files_inner(
    target: &SendTarget,
    options: &SendOptions,
    paths: &[PathBuf],
    observer: &dyn TransferObserver,
) -> Result<(), TransferError> {
    let (entries, total_size) = walk::enumerate_paths(paths)?;
    let chunk_size = network::chunk_size(options.chunk_size);
    let mut stream = connect(target, options).await?;

    match target.protocol {
        Protocol::Dukto => crate::dukto::client::send_files(&mut stream, total_size, &entries, chunk_size, observer).await,
        Protocol::NitroShare => {
            crate::nitroshare::client::send_files(&mut stream, &target.node_name, total_size, &entries, chunk_size, observer).await
        }
    }
}
