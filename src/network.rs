//! Network facts (spec Component A): local addresses, broadcast targets, and
//! the process-wide transfer chunk size.
//!
//! Grounded in the donor's `ui.rs::get_interface_ips` (which walks
//! `if_addrs::get_if_addrs()` filtering loopback and non-IPv4 interfaces) and
//! in `original_source/ndrop/transport.py::get_broadcast_address`, which
//! computes each adapter's broadcast address manually from its IP and
//! netmask rather than relying on the OS/library to hand one back.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use socket2::{Domain, Socket, Type};

/// Default transfer chunk size before the SO_SNDBUF cap is applied (64 KiB,
/// matching `ndrop/transport.py::CHUNK_SIZE`).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

fn is_link_local_v4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 169 && o[1] == 254
}

/// All non-loopback, non-link-local IPv4 addresses bound to this host.
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip),
            _ => None,
        })
        .filter(|ip| !ip.is_loopback() && !is_link_local_v4(*ip))
        .collect()
}

fn interface_ipv4_with_masks() -> Vec<(Ipv4Addr, Ipv4Addr)> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some((v4.ip, v4.netmask)),
            _ => None,
        })
        .filter(|(ip, _)| !ip.is_loopback() && !is_link_local_v4(*ip))
        .collect()
}

fn broadcast_of(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let ip_bits = u32::from(ip);
    let mask_bits = u32::from(netmask);
    Ipv4Addr::from(ip_bits | !mask_bits)
}

/// Broadcast addresses to send hello datagrams to. Passing
/// `Ipv4Addr::UNSPECIFIED` (`0.0.0.0`) returns every adapter's broadcast
/// address; passing a specific bound IP returns only that adapter's (or
/// nothing, if the address isn't one of ours) — mirroring
/// `get_broadcast_address(ip_addr=None)` vs a concrete `ip_addr`.
pub fn broadcasts_for(bind_ip: Ipv4Addr) -> Vec<Ipv4Addr> {
    let interfaces = interface_ipv4_with_masks();
    if bind_ip != Ipv4Addr::UNSPECIFIED {
        return interfaces
            .into_iter()
            .find(|(ip, _)| *ip == bind_ip)
            .map(|(ip, mask)| vec![broadcast_of(ip, mask)])
            .unwrap_or_default();
    }
    interfaces
        .into_iter()
        .map(|(ip, mask)| broadcast_of(ip, mask))
        .collect()
}

fn probe_sndbuf() -> std::io::Result<usize> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    Ok(socket.send_buffer_size()?)
}

static PROBED_CHUNK_SIZE: OnceLock<usize> = OnceLock::new();

/// The chunk size to use for this process's transfers: `DEFAULT_CHUNK_SIZE`
/// (or an explicit override) capped by the OS's actual UDP send buffer,
/// probed once and cached (the donor's `server.rs::max_blksize` uses the
/// same OnceLock-cached-probe shape for its own transfer socket sizing).
pub fn chunk_size(override_size: Option<usize>) -> usize {
    let probed = *PROBED_CHUNK_SIZE.get_or_init(|| probe_sndbuf().unwrap_or(DEFAULT_CHUNK_SIZE));
    let wanted = override_size.unwrap_or(DEFAULT_CHUNK_SIZE);
    wanted.min(probed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_is_computed_from_ip_and_mask() {
        let ip = Ipv4Addr::new(192, 168, 1, 42);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert_eq!(broadcast_of(ip, mask), Ipv4Addr::new(192, 168, 1, 255));
    }

    #[test]
    fn broadcast_handles_slash_16() {
        let ip = Ipv4Addr::new(10, 20, 3, 200);
        let mask = Ipv4Addr::new(255, 255, 0, 0);
        assert_eq!(broadcast_of(ip, mask), Ipv4Addr::new(10, 20, 255, 255));
    }

    #[test]
    fn link_local_is_rejected() {
        assert!(is_link_local_v4(Ipv4Addr::new(169, 254, 1, 1)));
        assert!(!is_link_local_v4(Ipv4Addr::new(169, 253, 1, 1)));
    }
}
