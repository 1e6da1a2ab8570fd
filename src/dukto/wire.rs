//! Dukto wire codec (§4.B). Grounded in `original_source/ndrop/dukto.py`'s
//! `DuktoPacket` class, translated from its stateful `unpack_tcp` generator
//! into an explicit state machine that consumes whatever has been buffered
//! so far and returns rather than blocking — the same "parse what you have,
//! ask for more if you don't" shape the donor's `tftp_protocol.rs` uses for
//! OACK/option parsing, just applied to a streaming TCP body instead of a
//! single UDP datagram.

use crate::error::FramingError;
use crate::sink::RecordSink;

pub const DEFAULT_TCP_PORT: u16 = 4644;
pub const DEFAULT_UDP_PORT: u16 = 4644;
pub const TEXT_SENTINEL: &str = "___DUKTO___TEXT___";

const TAG_HELLO_BROADCAST: u8 = 0x01;
const TAG_HELLO_UNICAST: u8 = 0x02;
const TAG_GOODBYE: u8 = 0x03;
const TAG_HELLO_BROADCAST_PORT: u8 = 0x04;
const TAG_HELLO_UNICAST_PORT: u8 = 0x05;

/// A parsed UDP presence datagram.
#[derive(Debug, Clone)]
pub enum UdpMessage {
    Hello {
        broadcast: bool,
        tcp_port: Option<u16>,
        identity: String,
    },
    Goodbye,
}

impl UdpMessage {
    pub fn parse(buf: &[u8]) -> Result<Self, FramingError> {
        let (&tag, rest) = buf.split_first().ok_or(FramingError::Short)?;
        match tag {
            TAG_HELLO_BROADCAST | TAG_HELLO_UNICAST => Ok(UdpMessage::Hello {
                broadcast: tag == TAG_HELLO_BROADCAST,
                tcp_port: None,
                identity: String::from_utf8(rest.to_vec())?,
            }),
            TAG_GOODBYE => Ok(UdpMessage::Goodbye),
            TAG_HELLO_BROADCAST_PORT | TAG_HELLO_UNICAST_PORT => {
                if rest.len() < 2 {
                    return Err(FramingError::Short);
                }
                let port = i16::from_le_bytes([rest[0], rest[1]]) as u16;
                let identity = String::from_utf8(rest[2..].to_vec())?;
                Ok(UdpMessage::Hello {
                    broadcast: tag == TAG_HELLO_BROADCAST_PORT,
                    tcp_port: Some(port),
                    identity,
                })
            }
            other => Err(FramingError::UnexpectedTag(other)),
        }
    }

    /// Encodes a hello. Only includes the 2-byte port field when the caller
    /// is listening on a non-default TCP port, matching the donor format
    /// (`pack_hello` only appends a port when one was explicitly set).
    pub fn encode_hello(broadcast: bool, tcp_port: u16, identity: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + identity.len());
        if tcp_port == DEFAULT_TCP_PORT {
            buf.push(if broadcast { TAG_HELLO_BROADCAST } else { TAG_HELLO_UNICAST });
        } else {
            buf.push(if broadcast {
                TAG_HELLO_BROADCAST_PORT
            } else {
                TAG_HELLO_UNICAST_PORT
            });
            buf.extend_from_slice(&(tcp_port as i16).to_le_bytes());
        }
        buf.extend_from_slice(identity.as_bytes());
        buf
    }

    pub fn encode_goodbye() -> Vec<u8> {
        let mut buf = vec![TAG_GOODBYE];
        buf.extend_from_slice(b"Bye Bye");
        buf
    }
}

/// Builds the `"<user> at <host> (<os>)"` identity line the donor calls a
/// signature (`dukto.py::get_signature`).
pub fn signature(user: &str, host: &str, os: &str) -> String {
    format!("{user} at {host} ({os})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Filename,
    FileSize,
    Data,
}

/// Resumable TCP body parser. One instance per connection; `feed` may be
/// called any number of times with however many bytes have arrived so far.
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

    /// Consumes as many complete records as `buf` allows, draining consumed
    /// bytes from the front. Returns `Ok(true)` once the declared record
    /// count and total size have both been satisfied.
    pub fn feed(&mut self, buf: &mut Vec<u8>, sink: &mut dyn RecordSink) -> Result<bool, FramingError> {
        loop {
            match self.state {
                State::Idle => {
                    if buf.len() < 16 {
                        return Ok(false);
                    }
                    self.record_count = i64::from_le_bytes(buf[0..8].try_into().unwrap());
                    self.total_size = i64::from_le_bytes(buf[8..16].try_into().unwrap());
                    buf.drain(0..16);
                    self.received_records = 0;
                    self.received_total = 0;
                    self.state = State::Filename;
                }
                State::Filename => {
                    let Some(nul_at) = buf.iter().position(|&b| b == 0) else {
                        return Ok(false);
                    };
                    let name_bytes: Vec<u8> = buf.drain(0..=nul_at).collect();
                    self.filename = String::from_utf8(name_bytes[..nul_at].to_vec())?;
                    self.state = State::FileSize;
                }
                State::FileSize => {
                    if buf.len() < 8 {
                        return Ok(false);
                    }
                    self.file_size = i64::from_le_bytes(buf[0..8].try_into().unwrap());
                    buf.drain(0..8);
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
                        buf.clear();
                        return Ok(true);
                    }
                    self.state = State::Filename;
                }
                State::Data => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let remaining = (self.file_size - self.received_file_size) as usize;
                    let take = remaining.min(buf.len());
                    let chunk: Vec<u8> = buf.drain(0..take).collect();
                    self.received_file_size += take as i64;
                    self.received_total += take as i64;
                    sink.feed(
                        &self.filename,
                        Some(&chunk),
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
                            buf.clear();
                            return Ok(true);
                        }
                        self.state = State::Filename;
                    }
                }
            }
        }
    }

    fn transfer_complete(&self) -> bool {
        self.received_records == self.record_count && self.received_total == self.total_size
    }
}

/// Builds the 16-byte `(record_count, total_size)` transfer header.
pub fn encode_transfer_header(record_count: i64, total_size: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&record_count.to_le_bytes());
    buf.extend_from_slice(&total_size.to_le_bytes());
    buf
}

/// Builds a single record's `name\0<file_size>` preamble.
pub fn encode_record_header(name: &str, file_size: i64) -> Result<Vec<u8>, FramingError> {
    if name.as_bytes().contains(&0) {
        return Err(FramingError::EmbeddedNul(name.to_string()));
    }
    let mut buf = Vec::with_capacity(name.len() + 9);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    buf.extend_from_slice(&file_size.to_le_bytes());
    Ok(buf)
}

/// Builds the one-record text transfer used for Dukto's "send text" mode:
/// a single file named `TEXT_SENTINEL` whose body is the UTF-8 text.
pub fn encode_text_transfer(text: &str) -> Vec<u8> {
    let body = text.as_bytes();
    let mut buf = encode_transfer_header(1, body.len() as i64);
    buf.extend_from_slice(&encode_record_header(TEXT_SENTINEL, body.len() as i64).expect("sentinel has no NUL"));
    buf.extend_from_slice(body);
    buf
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
    fn udp_hello_round_trip_default_port() {
        let encoded = UdpMessage::encode_hello(true, DEFAULT_TCP_PORT, "alice at box (linux)");
        match UdpMessage::parse(&encoded).unwrap() {
            UdpMessage::Hello { broadcast, tcp_port, identity } => {
                assert!(broadcast);
                assert_eq!(tcp_port, None);
                assert_eq!(identity, "alice at box (linux)");
            }
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn udp_hello_round_trip_custom_port() {
        let encoded = UdpMessage::encode_hello(false, 9000, "bob at desk (macosx)");
        match UdpMessage::parse(&encoded).unwrap() {
            UdpMessage::Hello { broadcast, tcp_port, identity } => {
                assert!(!broadcast);
                assert_eq!(tcp_port, Some(9000));
                assert_eq!(identity, "bob at desk (macosx)");
            }
            _ => panic!("expected hello"),
        }
    }

    #[test]
    fn udp_goodbye_round_trip() {
        let encoded = UdpMessage::encode_goodbye();
        assert!(matches!(UdpMessage::parse(&encoded).unwrap(), UdpMessage::Goodbye));
    }

    #[test]
    fn text_transfer_round_trip() {
        let mut buf = encode_text_transfer("hello dukto");
        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        let done = unpacker.feed(&mut buf, &mut rec).unwrap();
        assert!(done);
        assert_eq!(rec.events, vec![format!("feed:{TEXT_SENTINEL}"), format!("finish:{TEXT_SENTINEL}")]);
        assert_eq!(rec.buffers[0].as_deref(), Some(b"hello dukto".as_slice()));
    }

    #[test]
    fn resumable_under_byte_at_a_time_fragmentation() {
        let whole = encode_text_transfer("chunked message body");
        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        let mut buf = Vec::new();
        let mut done = false;
        for &byte in &whole {
            buf.push(byte);
            done = unpacker.feed(&mut buf, &mut rec).unwrap();
        }
        assert!(done);
        assert_eq!(rec.events, vec![format!("feed:{TEXT_SENTINEL}"), format!("finish:{TEXT_SENTINEL}")]);
    }

    #[test]
    fn directory_marker_has_no_data() {
        let mut buf = encode_transfer_header(1, 0);
        buf.extend_from_slice(&encode_record_header("photos", -1).unwrap());
        let mut unpacker = TcpUnpacker::new();
        let mut rec = Recorder::new();
        assert!(unpacker.feed(&mut buf, &mut rec).unwrap());
        assert_eq!(rec.buffers[0], None);
    }

    #[test]
    fn rejects_embedded_nul_in_name() {
        assert!(matches!(
            encode_record_header("bad\0name", 4),
            Err(FramingError::EmbeddedNul(_))
        ));
    }
}
