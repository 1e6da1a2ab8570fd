//! NitroShare protocol engine (§4.D specialized for NitroShare). Unlike
//! Dukto, NitroShare has no goodbye frame — liveness is entirely a function
//! of repeated hellos, so the engine's peer table needs a timeout sweep
//! (`original_source/ndrop/nitroshare.py::check_node`, `_hello_interval + 10`).

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

use wire::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, HelloMessage, TcpUnpacker};

/// Default hello cadence (§4.C). The spec documents a version-to-version
/// discrepancy in the liveness coefficient (5s vs 10s added to the hello
/// interval); per §9's Open Question we take the documented default of
/// `hello_interval + 10s` and make it a named constant rather than a guess
/// buried in a magic number.
pub const HELLO_INTERVAL: Duration = Duration::from_secs(2);
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(12);

struct ObserverSink<'a> {
    from: SocketAddr,
    observer: &'a dyn TransferObserver,
}

impl<'a> RecordSink for ObserverSink<'a> {
    fn feed(&mut self, name: &str, data: Option<&[u8]>, recv_size: i64, file_size: i64, total_recv: i64, total_size: i64) {
        self.observer
            .recv_feed_file(self.from, name, data, recv_size, file_size, total_recv, total_size);
    }

    fn finish_record(&mut self, name: &str) {
        self.observer.recv_finish_file(self.from, name, None);
    }
}

pub struct NitroShareEngine {
    uuid: String,
    node_name: String,
    operating_system: String,
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

impl NitroShareEngine {
    pub async fn bind(
        bind_ip: Ipv4Addr,
        tcp_port: Option<u16>,
        udp_port: Option<u16>,
        uuid: String,
        node_name: String,
        operating_system: String,
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
            uuid,
            node_name,
            operating_system,
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

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn peers(&self) -> Vec<Node> {
        self.peers.lock().unwrap().iter().cloned().collect()
    }

    pub async fn say_hello(&self) -> std::io::Result<()> {
        let hello = HelloMessage {
            uuid: self.uuid.clone(),
            name: self.node_name.clone(),
            operating_system: self.operating_system.clone(),
            port: self.tcp_port.to_string(),
            uses_tls: self.tls_acceptor.is_some(),
        };
        let encoded = hello.encode();
        for broadcast_ip in network::broadcasts_for(self.bind_ip) {
            let addr = SocketAddr::new(IpAddr::V4(broadcast_ip), self.udp_port);
            let _ = self.udp_socket.send_to(&encoded, addr).await;
        }
        Ok(())
    }

    fn is_self(&self, ip: IpAddr, uuid: &str) -> bool {
        if uuid == self.uuid {
            return true;
        }
        match ip {
            IpAddr::V4(v4) => self.local_ips.contains(&v4),
            IpAddr::V6(_) => false,
        }
    }

    pub async fn handle_udp_once(&self) -> std::io::Result<()> {
        let mut buf = vec![0u8; 2048];
        let (n, from) = self.udp_socket.recv_from(&mut buf).await?;
        let Ok(hello) = HelloMessage::parse(&buf[..n]) else {
            return Ok(());
        };
        if self.is_self(from.ip(), &hello.uuid) {
            return Ok(());
        }
        let node = Node {
            protocol: Protocol::NitroShare,
            ip: from.ip(),
            tcp_port: hello.port.parse().unwrap_or(DEFAULT_TCP_PORT),
            identity: Identity::NitroShare {
                uuid: hello.uuid,
                name: hello.name,
                operating_system: hello.operating_system,
            },
            last_seen: Instant::now(),
        };
        let is_new = self.peers.lock().unwrap().upsert(node.clone());
        if is_new {
            self.engine_observer.add_node(&node);
        } else {
            self.peers.lock().unwrap().touch(Protocol::NitroShare, from.ip(), Instant::now());
        }
        Ok(())
    }

    /// Sweeps the peer table for nodes that have gone silent for longer
    /// than `LIVENESS_TIMEOUT`; NitroShare has no goodbye frame so this is
    /// the only way a peer is ever removed.
    pub fn sweep_expired_peers(&self) {
        let expired = self.peers.lock().unwrap().sweep_expired(LIVENESS_TIMEOUT, Instant::now());
        for node in expired {
            self.engine_observer.remove_node(&node);
        }
    }

    /// Accepts and fully drains exactly one incoming TCP transfer, if a
    /// connection is pending. Serialized by design (§4.G).
    pub async fn accept_once(&self) -> std::io::Result<()> {
        let (tcp, peer_addr) = self.tcp_listener.accept().await?;
        let stream: BoxedStream = match &self.tls_acceptor {
            Some(acceptor) => match transport::accept_tls(acceptor, tcp).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%peer_addr, error = %err, "nitroshare tls handshake failed");
                    self.transfer_observer.recv_finish(peer_addr, "abort");
                    return Ok(());
                }
            },
            None => Box::new(tcp),
        };
        if let Err(err) = self.serve_connection(stream, peer_addr).await {
            tracing::warn!(%peer_addr, error = %err, "nitroshare transfer ended with an error");
            self.transfer_observer.recv_finish(peer_addr, "abort");
        }
        Ok(())
    }

    async fn serve_connection(&self, mut stream: BoxedStream, peer_addr: SocketAddr) -> Result<(), TransferError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut unpacker = TcpUnpacker::new();
        let mut buf = Vec::new();
        let mut read_buf = vec![0u8; network::chunk_size(None)];
        let mut sink = ObserverSink { from: peer_addr, observer: self.transfer_observer.as_ref() };

        loop {
            let n = tokio::time::timeout(Duration::from_secs(20), stream.read(&mut read_buf))
                .await
                .map_err(|_| TransferError::Timeout)??;
            if n == 0 {
                return Err(TransferError::ConnectionDropped);
            }
            buf.extend_from_slice(&read_buf[..n]);
            match unpacker.feed(&mut buf, &mut sink) {
                Ok(true) => {
                    stream.write_all(&wire::encode_success()).await?;
                    self.transfer_observer.recv_finish(peer_addr, "done");
                    return Ok(());
                }
                Ok(false) => continue,
                Err(err) => {
                    stream.write_all(&wire::encode_error(&err.to_string())).await?;
                    return Err(err.into());
                }
            }
        }
    }
}
