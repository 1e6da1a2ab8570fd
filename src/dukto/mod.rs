//! Dukto protocol engine (§4.D specialized for Dukto). Owns the UDP presence
//! socket and TCP transfer listener, keeps the peer table live, and drives
//! incoming transfers through [`wire::TcpUnpacker`] into a `TransferObserver`.
//!
//! Grounded in `original_source/ndrop/dukto.py`'s `DuktoServer`/`UDPHandler`/
//! `TCPHandler`, restructured around explicit `accept_once`/`handle_udp_once`
//! steps the way the spec's orchestrator readiness loop (§4.G) expects,
//! rather than the donor's free-running `socketserver` threads.

pub mod client;
pub mod wire;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;

use crate::error::TransferError;
use crate::network;
use crate::observer::{EngineObserver, TransferObserver};
use crate::peer::{Identity, Node, PeerTable, Protocol};
use crate::sink::RecordSink;
use crate::transport::{self, BoxedStream};

use wire::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, TEXT_SENTINEL, TcpUnpacker, UdpMessage};

/// A live connection's text-vs-file dispatch. The wire parser only knows
/// records; whether a record is "the text sentinel" is an engine concern
/// (`dukto.py`'s `DuktoServer.recv_feed_file` does this same sentinel check
/// before routing to `recv_feed_text`).
struct ObserverSink<'a> {
    from: SocketAddr,
    observer: &'a dyn TransferObserver,
    text_buffer: Option<Vec<u8>>,
}

impl<'a> RecordSink for ObserverSink<'a> {
    fn feed(&mut self, name: &str, data: Option<&[u8]>, recv_size: i64, file_size: i64, total_recv: i64, total_size: i64) {
        if name == TEXT_SENTINEL {
            if let Some(chunk) = data {
                self.observer.recv_feed_text(self.from, chunk);
                self.text_buffer.get_or_insert_with(Vec::new).extend_from_slice(chunk);
            }
        } else {
            self.observer
                .recv_feed_file(self.from, name, data, recv_size, file_size, total_recv, total_size);
        }
    }

    fn finish_record(&mut self, name: &str) {
        if name == TEXT_SENTINEL {
            let bytes = self.text_buffer.take().unwrap_or_default();
            let text = String::from_utf8_lossy(&bytes).into_owned();
            self.observer.recv_finish_text(self.from, &text);
        } else {
            self.observer.recv_finish_file(self.from, name, None);
        }
    }
}

pub struct DuktoEngine {
    identity: String,
    udp_socket: UdpSocket,
    tcp_listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    bind_ip: Ipv4Addr,
    udp_port: u16,
    tcp_port: u16,
    local_ips: Vec<Ipv4Addr>,
    peers: Mutex<PeerTable>,
    engine_observer: Arc<dyn EngineObserver>,
    transfer_observer: Arc<dyn TransferObserver>,
}

impl DuktoEngine {
    /// Binds the UDP presence socket and TCP transfer listener. `tcp_port`
    /// and `udp_port` default to 4644 when `None`, matching the listen-spec
    /// grammar `ip[:tcp_port[:udp_port]]` (§6). `tls_acceptor` is `Some` only
    /// when the host configured `--cert`/`--key`; TLS stays optional (§6).
    pub async fn bind(
        bind_ip: Ipv4Addr,
        tcp_port: Option<u16>,
        udp_port: Option<u16>,
        identity: String,
        tls_acceptor: Option<TlsAcceptor>,
        engine_observer: Arc<dyn EngineObserver>,
        transfer_observer: Arc<dyn TransferObserver>,
    ) -> Result<Arc<Self>, TransferError> {
        let udp_socket = UdpSocket::bind((bind_ip, udp_port.unwrap_or(DEFAULT_UDP_PORT))).await?;
        udp_socket.set_broadcast(true)?;
        let tcp_listener = TcpListener::bind((bind_ip, tcp_port.unwrap_or(DEFAULT_TCP_PORT))).await?;
        let bound_tcp_port = tcp_listener.local_addr()?.port();
        let bound_udp_port = udp_socket.local_addr()?.port();

        Ok(Arc::new(Self {
            identity,
            udp_socket,
            tcp_listener,
            tls_acceptor,
            bind_ip,
            udp_port: bound_udp_port,
            tcp_port: bound_tcp_port,
            local_ips: network::local_ipv4_addresses(),
            peers: Mutex::new(PeerTable::new()),
            engine_observer,
            transfer_observer,
        }))
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn peers(&self) -> Vec<Node> {
        self.peers.lock().unwrap().iter().cloned().collect()
    }

    /// Broadcasts a hello on every local IPv4 subnet. The donor's presence
    /// loop (`dukto.py::loop_say_hello`) fires every 30s; callers here drive
    /// the interval externally via `tokio::time::interval` in the
    /// orchestrator so it composes with NitroShare's different cadence.
    pub async fn say_hello(&self) -> std::io::Result<()> {
        let msg = UdpMessage::encode_hello(true, self.tcp_port, &self.identity);
        for broadcast_ip in network::broadcasts_for(self.bind_ip) {
            let addr = SocketAddr::new(IpAddr::V4(broadcast_ip), self.udp_port);
            let _ = self.udp_socket.send_to(&msg, addr).await;
        }
        Ok(())
    }

    pub async fn say_goodbye(&self) -> std::io::Result<()> {
        let msg = UdpMessage::encode_goodbye();
        for broadcast_ip in network::broadcasts_for(self.bind_ip) {
            let addr = SocketAddr::new(IpAddr::V4(broadcast_ip), self.udp_port);
            let _ = self.udp_socket.send_to(&msg, addr).await;
        }
        Ok(())
    }

    fn is_self(&self, ip: IpAddr, identity: &str) -> bool {
        if identity == self.identity {
            return true;
        }
        match ip {
            IpAddr::V4(v4) => self.local_ips.contains(&v4),
            IpAddr::V6(_) => false,
        }
    }

    /// Processes exactly one pending UDP datagram, if any. Used by the
    /// orchestrator's readiness-poll loop (§4.G).
    pub async fn handle_udp_once(&self) -> std::io::Result<()> {
        let mut buf = vec![0u8; 2048];
        let (n, from) = self.udp_socket.recv_from(&mut buf).await?;
        let Ok(msg) = UdpMessage::parse(&buf[..n]) else {
            return Ok(());
        };
        match msg {
            UdpMessage::Hello { broadcast, tcp_port, identity } => {
                if self.is_self(from.ip(), &identity) {
                    return Ok(());
                }
                if broadcast {
                    let reply = UdpMessage::encode_hello(false, self.tcp_port, &self.identity);
                    let _ = self.udp_socket.send_to(&reply, SocketAddr::new(from.ip(), self.udp_port)).await;
                }
                let node = Node {
                    protocol: Protocol::Dukto,
                    ip: from.ip(),
                    tcp_port: tcp_port.unwrap_or(DEFAULT_TCP_PORT),
                    identity: Identity::Dukto { signature: identity },
                    last_seen: Instant::now(),
                };
                let is_new = self.peers.lock().unwrap().upsert(node.clone());
                if is_new {
                    self.engine_observer.add_node(&node);
                }
            }
            UdpMessage::Goodbye => {
                let removed = self.peers.lock().unwrap().remove(Protocol::Dukto, from.ip());
                if let Some(node) = removed {
                    self.engine_observer.remove_node(&node);
                }
            }
        }
        Ok(())
    }

    /// Accepts and fully drains exactly one incoming TCP transfer, if a
    /// connection is pending. Serialized by design (§4.G): the orchestrator
    /// awaits this to completion before polling for the next connection, so
    /// only one transfer runs at a time.
    pub async fn accept_once(&self) -> std::io::Result<()> {
        let (tcp, peer_addr) = self.tcp_listener.accept().await?;
        let stream: BoxedStream = match &self.tls_acceptor {
            Some(acceptor) => match transport::accept_tls(acceptor, tcp).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%peer_addr, error = %err, "dukto tls handshake failed");
                    self.transfer_observer.recv_finish(peer_addr, "abort");
                    return Ok(());
                }
            },
            None => Box::new(tcp),
        };
        if let Err(err) = self.serve_connection(stream, peer_addr).await {
            tracing::warn!(%peer_addr, error = %err, "dukto transfer ended with an error");
            self.transfer_observer.recv_finish(peer_addr, "abort");
        }
        Ok(())
    }

    async fn serve_connection(&self, mut stream: BoxedStream, peer_addr: SocketAddr) -> Result<(), TransferError> {
        use tokio::io::AsyncReadExt;

        let mut unpacker = TcpUnpacker::new();
        let mut buf = Vec::new();
        let mut read_buf = vec![0u8; network::chunk_size(None)];
        let mut sink = ObserverSink {
            from: peer_addr,
            observer: self.transfer_observer.as_ref(),
            text_buffer: None,
        };

        loop {
            let n = tokio::time::timeout(Duration::from_secs(20), stream.read(&mut read_buf))
                .await
                .map_err(|_| TransferError::Timeout)??;
            if n == 0 {
                return Err(TransferError::ConnectionDropped);
            }
            buf.extend_from_slice(&read_buf[..n]);
            if unpacker.feed(&mut buf, &mut sink)? {
                self.transfer_observer.recv_finish(peer_addr, "done");
                return Ok(());
            }
        }
    }
}

/// Presence interval for the hello actor (§4.D: "for Dukto the interval is
/// ~30 s").
pub fn default_hello_interval() -> Duration {
    Duration::from_secs(30)
}
