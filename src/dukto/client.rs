//! Sender-side Dukto framing: turns a transfer descriptor into bytes on an
//! already-connected stream. Grounded in `original_source/ndrop/dukto.py`'s
//! `DuktoPacket.pack_files`/`pack_text`, restructured from a generator that
//! yields buffers into a push loop that writes straight to the socket
//! (§9 "Generator-based chunk emission becomes a push loop").

use std::io;

use md5::{Digest, Md5};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;
use crate::observer::{SizeMismatchDecision, TransferObserver};
use crate::walk::Entry;

use super::wire::{encode_record_header, encode_text_transfer, encode_transfer_header};

pub async fn send_text<W: AsyncWrite + Unpin>(stream: &mut W, text: &str) -> io::Result<()> {
    stream.write_all(&encode_text_transfer(text)).await
}

/// Streams `entries` as a Dukto file transfer. Mirrors `pack_files`: each
/// record is a `name\0size` preamble followed by exactly `size` bytes of
/// file content read in `chunk_size`-sized pieces. A file that grows past
/// its declared size mid-read is truncated to the declared bound and
/// reported through `on_size_mismatch`; a file that comes up short is a
/// fatal sender error (§4.B) because the receiver's parser would stall
/// waiting for bytes that will never arrive.
pub async fn send_files<W: AsyncWrite + Unpin>(
    stream: &mut W,
    total_size: i64,
    entries: &[Entry],
    chunk_size: usize,
    observer: &dyn TransferObserver,
) -> Result<(), TransferError> {
    stream
        .write_all(&encode_transfer_header(entries.len() as i64, total_size))
        .await?;

    let mut total_sent: i64 = 0;
    for entry in entries {
        stream.write_all(&encode_record_header(&entry.relative_path, entry.size)?).await?;

        if entry.size < 0 {
            observer.send_feed_file(&entry.relative_path, &[], 0, -1, total_sent, total_size);
            observer.send_finish_file(&entry.relative_path, None);
            continue;
        }
        if entry.size == 0 {
            observer.send_feed_file(&entry.relative_path, &[], 0, 0, total_sent, total_size);
            observer.send_finish_file(&entry.relative_path, None);
            continue;
        }

        let mut file = tokio::fs::File::open(&entry.absolute_path).await?;
        let mut sent: i64 = 0;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
            use tokio::io::AsyncReadExt;
            let want = chunk_size.min((entry.size - sent) as usize);
            if want == 0 {
                break;
            }
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(TransferError::SizeMismatch(entry.relative_path.clone()));
            }
            let chunk = &buf[..n];
            sent += chunk.len() as i64;
            total_sent += chunk.len() as i64;
            hasher.update(chunk);
            stream.write_all(chunk).await?;
            observer.send_feed_file(&entry.relative_path, chunk, sent, entry.size, total_sent, total_size);
        }

        // If the file is still growing after we've read its declared size,
        // detect that and let the host decide (§7: default abort).
        {
            use tokio::io::AsyncReadExt;
            let mut probe = [0u8; 1];
            if file.read(&mut probe).await.unwrap_or(0) > 0
                && observer.on_size_mismatch(&entry.relative_path, entry.size, entry.size + 1) == SizeMismatchDecision::Abort
            {
                return Err(TransferError::AbortedByOperator(entry.relative_path.clone()));
            }
        }

        let digest = format!("{:x}", hasher.finalize());
        observer.send_finish_file(&entry.relative_path, Some(&digest));
    }
    Ok(())
}
