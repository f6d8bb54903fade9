//! Flow identification: the direction-independent key used to locate a
//! flow's slot in the cache, and the 64-bit hash derived from it.

use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use crate::packet::Packet;

/// One endpoint of a flow: an IP address and a port (0 if not applicable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

/// The bag `{(ip_a, port_a), (ip_b, port_b), proto}`, canonicalized so that
/// two packets belonging to opposite directions of the same conversation
/// produce an equal key.
///
/// Canonicalization order is the endpoint with the lexicographically
/// smaller `(ip, port)` pair first. This is an arbitrary but deterministic
/// rule, chosen to mirror `ConnId::new`'s `cmp::min`/`cmp::max` ordering in
/// the connection-tracking style this crate is built on, rather than
/// relying on the original byte-string concatenation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub low: Endpoint,
    pub high: Endpoint,
    pub proto: u8,
}

/// Which of a packet's (src, dst) pair became the key's `low` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The packet's source is the key's `low` endpoint.
    Forward,
    /// The packet's source is the key's `high` endpoint.
    Reversed,
}

impl FlowKey {
    /// Builds the canonical key and direction bit for `packet`.
    pub fn from_packet(packet: &Packet) -> (FlowKey, Direction) {
        let src = Endpoint {
            ip: packet.src_ip,
            port: packet.src_port,
        };
        let dst = Endpoint {
            ip: packet.dst_ip,
            port: packet.dst_port,
        };
        Self::from_endpoints(src, dst, packet.ip_proto)
    }

    /// Same canonicalization as [`FlowKey::from_packet`], for callers that
    /// already have endpoints in hand rather than a [`Packet`].
    pub fn from_endpoints(src: Endpoint, dst: Endpoint, proto: u8) -> (FlowKey, Direction) {
        if src <= dst {
            (FlowKey { low: src, high: dst, proto }, Direction::Forward)
        } else {
            (FlowKey { low: dst, high: src, proto }, Direction::Reversed)
        }
    }

    /// A 64-bit hash of the canonical key, used to select a cache line.
    /// Collisions are expected and fully resolved by `Eq` on `FlowKey`
    /// itself; this is only a bucket selector.
    pub fn hash64(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Timestamp;
    use std::net::Ipv4Addr;

    fn pkt(src: &str, sport: u16, dst: &str, dport: u16) -> Packet<'static> {
        Packet {
            timestamp: Timestamp::new(0, 0),
            src_mac: [0; 6],
            dst_mac: [0; 6],
            ethertype: 0x0800,
            ip_version: 4,
            src_ip: src.parse::<Ipv4Addr>().unwrap().into(),
            dst_ip: dst.parse::<Ipv4Addr>().unwrap().into(),
            ip_proto: 6,
            ip_tos: 0,
            ip_ttl: 64,
            src_port: sport,
            dst_port: dport,
            tcp_flags: 0,
            l3_len: 0,
            payload: &[],
            frame: &[],
        }
    }

    #[test]
    fn direction_independence() {
        let (k1, d1) = FlowKey::from_packet(&pkt("10.0.0.1", 1000, "10.0.0.2", 2000));
        let (k2, d2) = FlowKey::from_packet(&pkt("10.0.0.2", 2000, "10.0.0.1", 1000));
        assert_eq!(k1, k2);
        assert_ne!(d1, d2);
    }
}
