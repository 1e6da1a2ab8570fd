//! NitroShare wire codec (§4.C). Grounded in
//! `original_source/ndrop/nitroshare.py`'s `Packet` class: JSON UDP hello,
//! and a length-tag-value TCP framing (`struct.unpack('<lb', ...)`)
//! translated into the same resumable-parser shape as the Dukto codec.

use serde::{Deserialize, Serialize};

use crate::error::FramingError;
use crate::sink::RecordSink;

pub const DEFAULT_TCP_PORT: u16 = 40818;
pub const DEFAULT_UDP_PORT: u16 = 40816;

const TAG_SUCCESS: u8 = 0x00;
const TAG_ERROR: u8 = 0x01;
const TAG_JSON: u8 = 0x02;
const TAG_DATA: u8 = 0x03;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloMessage {
    pub uuid: String,
    pub name: String,
    pub operating_system: String,
    /// Stringified, matching `TransferHeader`'s `size`/`count` and the
    /// donor's `data['port'] = '%s' % self._tcp_port` (`nitroshare.py`):
    /// a real NitroShare peer sends `"port":"40818"`, not a JSON number.
    pub port: String,
    pub uses_tls: bool,
}

impl HelloMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HelloMessage always serializes")
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FramingError> {
        Ok(serde_json::from_slice(buf)?)
    }
}

#[derive(Debug, Serialize)]
struct TransferHeader<'a> {
    count: String,
    size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TransferHeaderOwned {
    count: String,
    size: String,
}

#[derive(Debug, Serialize)]
struct FileHeader<'a> {
    name: &'a str,
    size: String,
    directory: bool,
    created: &'a str,
    last_modified: &'a str,
    last_read: &'a str,
}

#[derive(Debug, Deserialize)]
struct FileHeaderOwned {
    name: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    directory: bool,
}

/// Builds a length-tag-value frame: 4-byte LE `size` (tag + payload length),
/// then the tag byte, then the payload.
fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let size_field = (payload.len() + 1) as i32;
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.extend_from_slice(&size_field.to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(payload);
    buf
}

pub fn encode_success() -> Vec<u8> {
    frame(TAG_SUCCESS, &[])
}

pub fn encode_error(message: &str) -> Vec<u8> {
    frame(TAG_ERROR, message.as_bytes())
}

pub fn encode_transfer_header(record_count: i64, total_size: i64) -> Vec<u8> {
    let header = TransferHeader {
        count: record_count.to_string(),
        size: total_size.to_string(),
        name: None,
    };
    frame(TAG_JSON, &serde_json::to_vec(&header).expect("header always serializes"))
}

/// Same as [`encode_transfer_header`] but with the sending node's name
/// attached, matching `pack_files_header(get_platform_name(), ...)` in the
/// donor protocol. The receiver doesn't require this field; senders
/// include it for parity with existing NitroShare peers.
pub fn encode_transfer_header_named(name: &str, record_count: i64, total_size: i64) -> Vec<u8> {
    let header = TransferHeader {
        count: record_count.to_string(),
        size: total_size.to_string(),
        name: Some(name),
    };
    frame(TAG_JSON, &serde_json::to_vec(&header).expect("header always serializes"))
}

pub fn encode_file_header(name: &str, size: i64, is_directory: bool) -> Result<Vec<u8>, FramingError> {
    if name.as_bytes().contains(&0) {
        return Err(FramingError::EmbeddedNul(name.to_string()));
    }
    let header = FileHeader {
        name,
        size: size.max(0).to_string(),
        directory: is_directory,
        created: "",
        last_modified: "",
        last_read: "",
    };
    Ok(frame(TAG_JSON, &serde_json::to_vec(&header).expect("header always serializes")))
}

/// Splits `data` into one or more `0x03` data frames, each frame's total
/// on-wire size (5-byte header plus payload) bounded by `chunk_size` (§4.C:
/// "no packet exceeds the chunk bound").
pub fn encode_data_chunks(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    let payload_cap = chunk_size.saturating_sub(5).max(1);
    data.chunks(payload_cap).map(|c| frame(TAG_DATA, c)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    Data,
}

pub struct TcpUnpacker {
    state: State,
    record_count: i64,
    received_records: i64,
    total_size: i64,
    received_total: i64,
    filename: String,
    file_size: i64,
    received_file_size: i64,
}

impl Default for TcpUnpacker {
    fn default() -> Self {
        Self {
            state: State::Idle,
            record_count: 0,
            received_records: 0,
            total_size: 0,
            received_total: 0,
            filename: String::new(),
            file_size: 0,
            received_file_size: 0,
        }
    }
}

impl TcpUnpacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls one length-tag-value frame off the front of `buf` if a complete
    /// one is present, without consuming a partial frame.
    fn take_frame<'b>(buf: &'b mut Vec<u8>) -> Result<Option<(u8, Vec<u8>)>, FramingError> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let size_field = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        if size_field < 1 {
            return Err(FramingError::Malformed("non-positive packet size".into()));
        }
        let size_field = size_field as usize;
        if size_field > buf.len().saturating_sub(4) {
            return Ok(None);
        }
        let tag = buf[4];
        let payload = buf[5..4 + size_field].to_vec();
        buf.drain(0..4 + size_field);
        Ok(Some((tag, payload)))
    }

    pub fn feed(&mut self, buf: &mut Vec<u8>, sink: &mut dyn RecordSink) -> Result<bool, FramingError> {
        loop {
            let Some((tag, payload)) = Self::take_frame(buf)? else {
                return Ok(false);
            };
            match self.state {
                State::Idle => {
                    if tag != TAG_JSON {
                        if tag == TAG_ERROR {
                            return Err(FramingError::Malformed(format!(
                                "peer error: {}",
                                String::from_utf8_lossy(&payload)
                            )));
                        }
                        return Err(FramingError::UnexpectedTag(tag));
                    }
                    let header: TransferHeaderOwned = serde_json::from_slice(&payload)?;
                    self.record_count = header.count.parse().unwrap_or(0);
                    self.total_size = header.size.parse().unwrap_or(0);
                    self.received_records = 0;
                    self.received_total = 0;
                    self.state = State::Header;
                }
                State::Header => {
                    if tag != TAG_JSON {
                        return Err(FramingError::UnexpectedTag(tag));
                    }
                    let header: FileHeaderOwned = serde_json::from_slice(&payload)?;
                    self.filename = header.name;
                    self.file_size = if header.directory {
                        -1
                    } else {
                        header.size.parse().unwrap_or(0)
                    };
                    self.received_file_size = 0;
                    if self.file_size > 0 {
                        self.state = State::Data;
                        continue;
                    }
                    let data: Option<&[u8]> = if self.file_size < 0 { None } else { Some(&[][..]) };
                    sink.feed(&self.filename, data, 0, self.file_size, self.received_total, self.total_size);
                    sink.finish_record(&self.filename);
                    self.received_records += 1;
                    if self.transfer_complete() {
                        self.state = State::Idle;
                        return Ok(true);
                    }
                    self.state = State::Header;
                }
                State::Data => {
                    if tag != TAG_DATA {
                        return Err(FramingError::UnexpectedTag(tag));
                    }
                    self.received_file_size += payload.len() as i64;
                    self.received_total += payload.len() as i64;
                    sink.feed(
                        &self.filename,
                        Some(&payload),
                        self.received_file_size,
                        self.file_size,
                        self.received_total,
                        self.total_size,
                    );
                    if self.received_file_size == self.file_size {
                        self.received_records += 1;
                        sink.finish_record(&self.filename);
                        if self.transfer_complete() {
                            self.state = State::Idle;
                            return Ok(true);
                        }
                        self.state = State::Header;
                    }
                }
            }
        }
    }

    fn transfer_complete(&self) -> bool {
        self.received_records == self.record_count && self.received_total == self.total_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        events: Vec<String>,
        buffers: Vec<Option<Vec<u8>>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self { events: Vec::new(), buffers: Vec::new() }
        }
    }

    impl RecordSink for Recorder {
        fn feed(&mut self, name: &str, data: Option<&[u8]>, _rs: i64, _fs: i64, _tr: i64, _ts: i64) {
            self.events.push(format!("feed:{name}"));
            self.buffers.push(data.map(|d| d.to_vec()));
        }
        fn finish_record(&mut self, name: &str) {
            self.events.push(format!("finish:{name}"));
        }
    }

    #[test]
    fn hello_round_trips_through_json() {
        let hello = HelloMessage {
            uuid: "abc-123".into(),
            name: "workstation".into(),
            operating_system: "linux".into(),
            port: "40818".into(),
            uses_tls: false,
        };
        let parsed = HelloMessage::parse(&hello.encode()).unwrap();
        assert_eq!(parsed.uuid, "abc-123");
        assert_eq!(parsed.port, "40818");
    }

    #[test]
    fn hello_parses_a_real_peers_wire_format() {
        let wire = br#"{"uuid":"abc-123","name":"workstation","operating_system":"linux","port":"40818","uses_tls":false}"#;
        let parsed = HelloMessage::parse(wire).unwrap();
        assert_eq!(parsed.port, "40818");
    }

    #[test]
    fn single_small_file_round_trip() {
        let body = b"hi nitroshare";
        let mut buf = encode_transfer_header(1, body.len() as i64);
        buf.extend_from_slice(&encode_file_header("greeting.txt", body.len() as i64, false).unwrap());
        for chunk in encode_data_chunks(body, 64 * 1024) {
            buf.extend_from_slice(&chunk);
        }
        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        assert!(unpacker.feed(&mut buf, &mut rec).unwrap());
        assert_eq!(rec.events, vec!["feed:greeting.txt", "finish:greeting.txt"]);
        assert_eq!(rec.buffers[0].as_deref(), Some(body.as_slice()));
    }

    #[test]
    fn resumable_under_two_byte_fragmentation() {
        let body = vec![0xABu8; 5000];
        let mut whole = encode_transfer_header(1, body.len() as i64);
        whole.extend_from_slice(&encode_file_header("blob.bin", body.len() as i64, false).unwrap());
        for chunk in encode_data_chunks(&body, 1024) {
            whole.extend_from_slice(&chunk);
        }

        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        let mut buf = Vec::new();
        let mut done = false;
        for pair in whole.chunks(2) {
            buf.extend_from_slice(pair);
            done = unpacker.feed(&mut buf, &mut rec).unwrap();
        }
        assert!(done);
        let reassembled: Vec<u8> = rec.buffers.iter().flatten().flatten().copied().collect();
        assert_eq!(reassembled, body);
    }

    #[test]
    fn directory_entry_has_no_data() {
        let mut buf = encode_transfer_header(1, 0);
        buf.extend_from_slice(&encode_file_header("empty_dir", 0, true).unwrap());
        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        assert!(unpacker.feed(&mut buf, &mut rec).unwrap());
        assert_eq!(rec.buffers[0], None);
    }

    #[test]
    fn data_chunks_respect_the_chunk_bound() {
        let data = vec![1u8; 1000];
        let chunks = encode_data_chunks(&data, 100);
        assert!(chunks.iter().all(|c| c.len() <= 100));
    }
}
