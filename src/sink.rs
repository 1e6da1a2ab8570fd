//! Receive-side disk persistence (spec Component F). Grounded in
//! `original_source/ndrop/netdrop.py`'s `NetDropServer`: files are created
//! lazily on the first `recv_feed_file` call for a path, directories are
//! created eagerly with no data to write, and a read-only drop directory
//! still drains every byte off the wire so wire framing never desyncs.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Mutex;

use md5::{Digest, Md5};

use crate::observer::TransferObserver;

/// The narrow callback surface a resumable TCP unpacker drives as it parses
/// records off the wire, before the owning engine decides how those records
/// map onto `TransferObserver` (Dukto's sentinel-filename text transfer vs.
/// NitroShare's explicit directory flag both get resolved one layer up).
///
/// `data == None` marks a directory entry; `data == Some(&[])` marks a
/// zero-byte file that still needs a finish event.
pub trait RecordSink {
    fn feed(
        &mut self,
        name: &str,
        data: Option<&[u8]>,
        recv_size: i64,
        file_size: i64,
        total_recv: i64,
        total_size: i64,
    );
    fn finish_record(&mut self, name: &str);
}

/// Where received records land.
#[derive(Debug, Clone)]
pub enum DropTarget {
    /// Write into this directory, creating it first if it doesn't exist.
    Directory(PathBuf),
    /// Write every received file's bytes to stdout, one after another,
    /// matching the donor's `saved_to('-')` behavior.
    Stdout,
}

enum FileHandle {
    Disk(std::fs::File),
    Stdout,
    /// Drop directory isn't writable; bytes are hashed and discarded.
    Discarded,
}

struct ActiveFile {
    handle: FileHandle,
    hasher: Md5,
}

/// Disk-materializing `TransferObserver`. Wraps a host observer so callers
/// still see the usual telemetry; this sink's only job is side effects on
/// the filesystem (and computing the MD5 the donor reports per file).
pub struct FsReceiverSink {
    target: DropTarget,
    inner: std::sync::Arc<dyn TransferObserver>,
    writable: bool,
    warned_read_only: Mutex<bool>,
    active: Mutex<HashMap<(SocketAddr, String), ActiveFile>>,
}

impl FsReceiverSink {
    /// Creates the sink and, for a directory target, creates the directory
    /// if missing and probes it for write access up front (§4.F, §8
    /// "permission denied drains the stream").
    pub fn new(target: DropTarget, inner: std::sync::Arc<dyn TransferObserver>) -> std::io::Result<Self> {
        let writable = match &target {
            DropTarget::Stdout => true,
            DropTarget::Directory(dir) => {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)?;
                }
                is_writable(dir)
            }
        };
        Ok(Self {
            target,
            inner,
            writable,
            warned_read_only: Mutex::new(false),
            active: Mutex::new(HashMap::new()),
        })
    }

    fn warn_read_only_once(&self, path: &str) {
        let mut warned = self.warned_read_only.lock().unwrap();
        if !*warned {
            tracing::warn!(%path, "drop directory is not writable, draining incoming bytes without saving");
            *warned = true;
        }
    }

    fn open_file(&self, path: &str) -> FileHandle {
        match &self.target {
            DropTarget::Stdout => FileHandle::Stdout,
            DropTarget::Directory(dir) => {
                if !self.writable {
                    self.warn_read_only_once(path);
                    return FileHandle::Discarded;
                }
                let full = dir.join(path);
                if let Some(parent) = full.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                match std::fs::File::create(&full) {
                    Ok(f) => FileHandle::Disk(f),
                    Err(err) => {
                        tracing::warn!(path = %full.display(), error = %err, "failed to create file, draining without saving");
                        FileHandle::Discarded
                    }
                }
            }
        }
    }

    fn make_directory(&self, path: &str) {
        if let DropTarget::Directory(dir) = &self.target {
            if self.writable {
                let _ = std::fs::create_dir_all(dir.join(path));
            } else {
                self.warn_read_only_once(path);
            }
        }
    }
}

fn is_writable(dir: &std::path::Path) -> bool {
    let probe = dir.join(format!(".dropwire-write-probe-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

impl TransferObserver for FsReceiverSink {
    fn recv_feed_file(
        &self,
        from: SocketAddr,
        path: &str,
        data: Option<&[u8]>,
        recv_size: i64,
        file_size: i64,
        total_recv: i64,
        total_size: i64,
    ) {
        let key = (from, path.to_string());
        let mut active = self.active.lock().unwrap();
        if !active.contains_key(&key) {
            if file_size < 0 {
                self.make_directory(path);
            } else {
                let handle = self.open_file(path);
                active.insert(key.clone(), ActiveFile { handle, hasher: Md5::new() });
            }
        }
        if let Some(chunk) = data {
            if let Some(entry) = active.get_mut(&key) {
                entry.hasher.update(chunk);
                match &mut entry.handle {
                    FileHandle::Disk(f) => {
                        if let Err(err) = f.write_all(chunk) {
                            tracing::warn!(%path, error = %err, "write failed mid-transfer, continuing to drain");
                            entry.handle = FileHandle::Discarded;
                        }
                    }
                    FileHandle::Stdout => {
                        let _ = std::io::stdout().write_all(chunk);
                    }
                    FileHandle::Discarded => {}
                }
            }
        }
        drop(active);
        self.inner.recv_feed_file(from, path, data, recv_size, file_size, total_recv, total_size);
    }

    fn recv_finish_file(&self, from: SocketAddr, path: &str, _md5_hex: Option<&str>) {
        let key = (from, path.to_string());
        let digest = {
            let mut active = self.active.lock().unwrap();
            active.remove(&key).map(|entry| {
                if let FileHandle::Stdout = entry.handle {
                    let _ = std::io::stdout().flush();
                }
                format!("{:x}", entry.hasher.finalize())
            })
        };
        self.inner.recv_finish_file(from, path, digest.as_deref());
    }

    fn recv_feed_text(&self, from: SocketAddr, data: &[u8]) {
        self.inner.recv_feed_text(from, data);
    }

    fn recv_finish_text(&self, from: SocketAddr, text: &str) {
        self.inner.recv_finish_text(from, text);
    }

    fn recv_finish(&self, from: SocketAddr, reason: &str) {
        let reason = if reason == "done" && !self.writable { "read_only" } else { reason };
        self.inner.recv_finish(from, reason);
    }

    fn send_feed_file(
        &self,
        path: &str,
        data: &[u8],
        send_size: i64,
        file_size: i64,
        total_send: i64,
        total_size: i64,
    ) {
        self.inner.send_feed_file(path, data, send_size, file_size, total_send, total_size);
    }

    fn send_finish_file(&self, path: &str, md5_hex: Option<&str>) {
        self.inner.send_finish_file(path, md5_hex);
    }

    fn send_finish(&self, result: &str) {
        self.inner.send_finish(result);
    }

    fn on_size_mismatch(&self, path: &str, declared: i64, observed_at_least: i64) -> crate::observer::SizeMismatchDecision {
        self.inner.on_size_mismatch(path, declared, observed_at_least)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999)
    }

    #[test]
    fn writes_file_bytes_and_reports_md5() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FsReceiverSink::new(DropTarget::Directory(tmp.path().to_path_buf()), std::sync::Arc::new(NullObserver)).unwrap();

        sink.recv_feed_file(addr(), "hello.txt", Some(b"hi"), 2, 2, 2, 2);
        sink.recv_finish_file(addr(), "hello.txt", None);

        let contents = std::fs::read(tmp.path().join("hello.txt")).unwrap();
        assert_eq!(contents, b"hi");
    }

    #[test]
    fn directory_entries_create_directories_without_data() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = FsReceiverSink::new(DropTarget::Directory(tmp.path().to_path_buf()), std::sync::Arc::new(NullObserver)).unwrap();

        sink.recv_feed_file(addr(), "photos", None, 0, -1, 0, 0);
        sink.recv_finish_file(addr(), "photos", None);

        assert!(tmp.path().join("photos").is_dir());
    }

    #[test]
    fn read_only_directory_drains_bytes_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("locked");
        std::fs::create_dir(&dir).unwrap();
        let mut perms = std::fs::metadata(&dir).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o555);
        std::fs::set_permissions(&dir, perms).unwrap();

        let sink = FsReceiverSink::new(DropTarget::Directory(dir.clone()), std::sync::Arc::new(NullObserver)).unwrap();
        sink.recv_feed_file(addr(), "secret.txt", Some(b"nope"), 4, 4, 4, 4);
        sink.recv_finish_file(addr(), "secret.txt", None);
        sink.recv_finish(addr(), "done");

        assert!(!dir.join("secret.txt").exists());

        let mut perms = std::fs::metadata(&dir).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&dir, perms).unwrap();
    }
}
