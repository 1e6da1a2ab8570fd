//! Sender-side NitroShare framing. Grounded in
//! `original_source/ndrop/nitroshare.py`'s `Packet.pack_files`: unlike
//! Dukto, every chunk of file data gets its own length-tag-value frame, and
//! the sender reads the peer's single acknowledgement packet after writing
//! the last byte (`NitroshareClient.send_files`).

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;
use crate::observer::{SizeMismatchDecision, TransferObserver};
use crate::walk::Entry;

use super::wire::{encode_data_chunks, encode_file_header, encode_transfer_header_named};

/// Streams `entries` as a NitroShare file transfer, then reads the peer's
/// trailing success/error acknowledgement off the same stream.
pub async fn send_files<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    node_name: &str,
    total_size: i64,
    entries: &[Entry],
    chunk_size: usize,
    observer: &dyn TransferObserver,
) -> Result<(), TransferError> {
    stream
        .write_all(&encode_transfer_header_named(node_name, entries.len() as i64, total_size))
        .await?;

    let mut total_sent: i64 = 0;
    for entry in entries {
        stream.write_all(&encode_file_header(&entry.relative_path, entry.size, entry.size < 0)?).await?;

        if entry.size <= 0 {
            observer.send_feed_file(&entry.relative_path, &[], 0, entry.size, total_sent, total_size);
            observer.send_finish_file(&entry.relative_path, None);
            continue;
        }

        let mut file = tokio::fs::File::open(&entry.absolute_path).await?;
        let mut sent: i64 = 0;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; chunk_size];
        loop {
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
            for framed in encode_data_chunks(chunk, chunk_size) {
                stream.write_all(&framed).await?;
            }
            observer.send_feed_file(&entry.relative_path, chunk, sent, entry.size, total_sent, total_size);
        }

        {
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

    let mut ack = Vec::new();
    stream.read_to_end(&mut ack).await?;
    Ok(())
}
