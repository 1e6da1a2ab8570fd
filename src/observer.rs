//! The upward capability interfaces a host application implements (§6).
//!
//! The donor crate reports everything through a single `ServerEvent` enum
//! pushed over an `mpsc` channel to its TUI. This crate has two independent
//! event streams instead — peer discovery and transfer progress — so they
//! are split into two traits rather than bolted onto one enum. Default
//! method bodies are no-ops so a host only implements what it cares about.

use crate::peer::Node;

/// Fired as peers come and go on either wire protocol.
pub trait EngineObserver: Send + Sync {
    fn add_node(&self, _node: &Node) {}
    fn remove_node(&self, _node: &Node) {}
}

/// How the host wants a mid-transfer file-size mismatch resolved (§7).
/// `Continue` keeps streaming past the declared bound; the default is
/// `Abort`, matching the spec's stated default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeMismatchDecision {
    Abort,
    Continue,
}

/// Receive- and send-side transfer telemetry (§4.E, §4.F).
///
/// All methods take `&self` since observers are shared across concurrent
/// transfers via `Arc`; any mutable bookkeeping a host needs is its own
/// problem (interior mutability, channels, etc).
pub trait TransferObserver: Send + Sync {
    fn recv_feed_file(
        &self,
        _from: std::net::SocketAddr,
        _path: &str,
        _data: Option<&[u8]>,
        _recv_size: i64,
        _file_size: i64,
        _total_recv: i64,
        _total_size: i64,
    ) {
    }
    fn recv_finish_file(&self, _from: std::net::SocketAddr, _path: &str, _md5_hex: Option<&str>) {}
    fn recv_feed_text(&self, _from: std::net::SocketAddr, _data: &[u8]) {}
    fn recv_finish_text(&self, _from: std::net::SocketAddr, _text: &str) {}
    fn recv_finish(&self, _from: std::net::SocketAddr, _reason: &str) {}

    fn send_feed_file(
        &self,
        _path: &str,
        _data: &[u8],
        _send_size: i64,
        _file_size: i64,
        _total_send: i64,
        _total_size: i64,
    ) {
    }
    fn send_finish_file(&self, _path: &str, _md5_hex: Option<&str>) {}
    /// `result == "done"` on success; otherwise the error message (§6).
    fn send_finish(&self, _result: &str) {}

    /// Called when a file being sent has grown or shrunk relative to the
    /// size declared when the transfer started. Default: abort (§7).
    fn on_size_mismatch(&self, _path: &str, _declared: i64, _observed_at_least: i64) -> SizeMismatchDecision {
        SizeMismatchDecision::Abort
    }
}

/// An observer that does nothing; useful for headless library callers that
/// only want the transfer's side effects on disk, not its telemetry.
pub struct NullObserver;

impl EngineObserver for NullObserver {}
impl TransferObserver for NullObserver {}
