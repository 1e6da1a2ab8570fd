//! Typed errors for the codec and engine layers.
//!
//! `anyhow` is used at the CLI/orchestration boundary; everything below this
//! line is matched on by callers (retry vs abort vs log-and-continue), so it
//! keeps distinct variants instead of a single opaque error.

use std::io;

/// A malformed or unexpected byte sequence on the wire. Framing errors abort
/// the connection they occurred on but never bring down the listener.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("short read, need more bytes")]
    Short,

    #[error("unexpected tag byte: {0:#04x}")]
    UnexpectedTag(u8),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("invalid utf-8 in frame: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid json frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedded NUL byte in path: {0}")]
    EmbeddedNul(String),
}

/// Errors surfaced while driving a transfer (send or receive side).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("file {0} changed size during transfer and the operator aborted")]
    AbortedByOperator(String),

    #[error("file {0} ended before reaching its declared size")]
    SizeMismatch(String),

    #[error("peer dropped the connection mid-transfer")]
    ConnectionDropped,

    #[error("drop directory is not writable")]
    ReadOnly,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("socket timed out")]
    Timeout,

    #[error("tls error: {0}")]
    Tls(String),
}
