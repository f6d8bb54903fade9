//! The transient, per-packet value type.
//!
//! A [`Packet`] is produced fresh for every captured frame and lives only
//! for the duration of one [`crate::cache::FlowCache::put`] call; the cache
//! never stores one beyond that. `payload` and `frame` borrow from whatever
//! buffer the packet source owns for that iteration.

use std::net::IpAddr;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet as _;

/// Monotonic capture time, seconds and microseconds since an arbitrary epoch.
///
/// Kept as two integers (mirroring `struct timeval`, as produced by libpcap)
/// rather than a single float so that packet sources can hand off the raw
/// capture header fields without a lossy conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(secs: u64, micros: u32) -> Self {
        Timestamp { secs, micros }
    }

    /// Seconds elapsed from `earlier` to `self`. Returns `0.0` if `self` is
    /// not after `earlier` (clocks are assumed monotonic within one source).
    pub fn since(&self, earlier: Timestamp) -> f64 {
        if *self < earlier {
            return 0.0;
        }
        let secs = (self.secs - earlier.secs) as f64;
        let micros = self.micros as f64 - earlier.micros as f64;
        secs + micros / 1_000_000.0
    }
}

/// TCP control bits, by position in the 8-bit flags byte.
pub mod tcp_flags {
    pub const FIN: u8 = 0b0000_0001;
    pub const SYN: u8 = 0b0000_0010;
    pub const RST: u8 = 0b0000_0100;
    pub const PSH: u8 = 0b0000_1000;
    pub const ACK: u8 = 0b0001_0000;
    pub const URG: u8 = 0b0010_0000;
}

/// IANA protocol numbers this crate understands at layer 4.
pub const TCP_PROTOCOL: u8 = 6;
pub const UDP_PROTOCOL: u8 = 17;

/// One captured frame, with L2/L3/L4 headers already parsed out.
///
/// This is the boundary type between the out-of-scope packet capture
/// component and the flow aggregation engine: a `Packet` is a value, not a
/// handle into capture-library memory, so the engine never needs to know
/// how it was produced.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub timestamp: Timestamp,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub ethertype: u16,
    pub ip_version: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub ip_proto: u8,
    pub ip_tos: u8,
    pub ip_ttl: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    /// IP header length plus everything after it, i.e. `ip_header->tot_len`
    /// (matching how the original flow meter sums byte counts, so trailing
    /// Ethernet padding on short frames is never counted). Computed once by
    /// [`Packet::parse_frame`] rather than re-derived from `frame` on every
    /// access, so a `Packet` built by hand (as most tests do) can simply
    /// state the byte count it wants without assembling real header bytes.
    pub l3_len: u32,
    pub payload: &'a [u8],
    pub frame: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Parses a captured Ethernet frame into a [`Packet`]. Returns `None`
    /// for anything this crate does not understand: non-IP ethertypes,
    /// malformed headers, or L4 protocols other than TCP/UDP (ICMP, etc.
    /// are out of scope for flow aggregation as specified).
    pub fn parse_frame(frame: &'a [u8], timestamp: Timestamp) -> Option<Packet<'a>> {
        let eth = EthernetPacket::new(frame)?;
        let src_mac = eth.get_source().octets();
        let dst_mac = eth.get_destination().octets();
        let ethertype = eth.get_ethertype().0;

        match eth.get_ethertype() {
            EtherTypes::Ipv4 => {
                let ip = Ipv4Packet::new(eth.payload())?;
                let ip_proto = ip.get_next_level_protocol().0;
                let ip_tos = ip.get_dscp() << 2 | ip.get_ecn();
                let ip_ttl = ip.get_ttl();
                let src_ip = IpAddr::V4(ip.get_source());
                let dst_ip = IpAddr::V4(ip.get_destination());
                let l3_len = ip.get_total_length() as u32;
                let (src_port, dst_port, tcp_flags, payload) =
                    parse_l4(ip.get_next_level_protocol().0, ip.payload())?;
                Some(Packet {
                    timestamp,
                    src_mac,
                    dst_mac,
                    ethertype,
                    ip_version: 4,
                    src_ip,
                    dst_ip,
                    ip_proto,
                    ip_tos,
                    ip_ttl,
                    src_port,
                    dst_port,
                    tcp_flags,
                    l3_len,
                    payload,
                    frame,
                })
            }
            EtherTypes::Ipv6 => {
                let ip = Ipv6Packet::new(eth.payload())?;
                let ip_proto = ip.get_next_header().0;
                let ip_tos = ip.get_traffic_class();
                let ip_ttl = ip.get_hop_limit();
                let src_ip = IpAddr::V6(ip.get_source());
                let dst_ip = IpAddr::V6(ip.get_destination());
                // IPv6 fixed header (40 bytes) + payload length field.
                let l3_len = 40 + ip.get_payload_length() as u32;
                let (src_port, dst_port, tcp_flags, payload) =
                    parse_l4(ip.get_next_header().0, ip.payload())?;
                Some(Packet {
                    timestamp,
                    src_mac,
                    dst_mac,
                    ethertype,
                    ip_version: 6,
                    src_ip,
                    dst_ip,
                    ip_proto,
                    ip_tos,
                    ip_ttl,
                    src_port,
                    dst_port,
                    tcp_flags,
                    l3_len,
                    payload,
                    frame,
                })
            }
            _ => None,
        }
    }
}

/// Extracts port and flag fields for TCP/UDP, or `(0, 0, 0, payload)` for
/// any other L4 protocol (ports and flags are "not applicable" per spec).
fn parse_l4(proto: u8, data: &[u8]) -> Option<(u16, u16, u8, &[u8])> {
    if proto == IpNextHeaderProtocols::Tcp.0 {
        let tcp = TcpPacket::new(data)?;
        let offset = (tcp.get_data_offset() as usize * 4).min(data.len());
        Some((tcp.get_source(), tcp.get_destination(), tcp.get_flags(), &data[offset..]))
    } else if proto == IpNextHeaderProtocols::Udp.0 {
        let udp = UdpPacket::new(data)?;
        let offset = 8.min(data.len());
        Some((udp.get_source(), udp.get_destination(), 0, &data[offset..]))
    } else {
        Some((0, 0, 0, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_since() {
        let t0 = Timestamp::new(10, 500_000);
        let t1 = Timestamp::new(11, 0);
        assert!((t1.since(t0) - 0.5).abs() < 1e-9);
        assert_eq!(t0.since(t1), 0.0);
    }

    #[test]
    fn parse_l4_clamps_oversized_tcp_data_offset() {
        // data_offset claims a 60-byte header (offset 15) but only the
        // minimum 20-byte fixed header is actually present.
        let mut tcp = vec![0u8; 20];
        tcp[12] = 15 << 4;
        let (src, dst, flags, payload) = parse_l4(TCP_PROTOCOL, &tcp).unwrap();
        assert_eq!((src, dst, flags), (0, 0, 0));
        assert!(payload.is_empty());
    }
}
