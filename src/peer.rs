//! The peer table shared by every protocol engine (spec Component D / §3).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

/// Which wire protocol a `Node` was discovered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Dukto,
    NitroShare,
}

/// Protocol-specific identity carried alongside the network-level `Node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Dukto identifies itself with a single free-form "<user> at <host> (<os>)" line.
    Dukto { signature: String },
    /// NitroShare identifies itself with a stable per-process UUID plus a JSON hello.
    NitroShare {
        uuid: String,
        name: String,
        operating_system: String,
    },
}

/// A discovered remote endpoint. Addresses are keyed by `(protocol, ip)`
/// since a single host can appear in both protocols' tables simultaneously.
#[derive(Debug, Clone)]
pub struct Node {
    pub protocol: Protocol,
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub identity: Identity,
    pub last_seen: Instant,
}

impl Node {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }
}

/// Per-engine table of currently-live peers.
///
/// Dukto nodes are sticky: they are removed only by an explicit goodbye
/// datagram. NitroShare nodes expire after `hello_interval + 10s` of
/// silence (§4.C); the orchestrator sweeps for that on a timer.
#[derive(Debug, Default)]
pub struct PeerTable {
    nodes: HashMap<(Protocol, IpAddr), Node>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a node. Returns `true` if this is a newly-seen peer
    /// (callers use this to decide whether to fire `EngineObserver::add_node`).
    pub fn upsert(&mut self, node: Node) -> bool {
        let key = (node.protocol, node.ip);
        let is_new = !self.nodes.contains_key(&key);
        self.nodes.insert(key, node);
        is_new
    }

    pub fn remove(&mut self, protocol: Protocol, ip: IpAddr) -> Option<Node> {
        self.nodes.remove(&(protocol, ip))
    }

    pub fn touch(&mut self, protocol: Protocol, ip: IpAddr, now: Instant) {
        if let Some(node) = self.nodes.get_mut(&(protocol, ip)) {
            node.last_seen = now;
        }
    }

    /// Remove and return every node whose `last_seen` predates `now - timeout`.
    pub fn sweep_expired(&mut self, timeout: std::time::Duration, now: Instant) -> Vec<Node> {
        let expired: Vec<(Protocol, IpAddr)> = self
            .nodes
            .iter()
            .filter(|(_, node)| now.duration_since(node.last_seen) > timeout)
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.nodes.remove(&key))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contains(&self, protocol: Protocol, ip: IpAddr) -> bool {
        self.nodes.contains_key(&(protocol, ip))
    }
}
