//! The aggregated bidirectional flow record and its extension list.

use std::net::IpAddr;

use serde::Serialize;

use super::key::{Direction, FlowKey};
use crate::dissector::http::{HttpRequestExt, HttpResponseExt};
use crate::packet::{Packet, Timestamp};

/// Tags a [`RecordExt`] variant without needing to match on it.
///
/// Only `HttpRequest`/`HttpResponse` are backed by an implemented
/// dissector in this crate (see `spec.md`'s Non-goal on dissector parsing
/// minutiae beyond HTTP). The remaining variants are named here because
/// they appear in the data model as extension kinds a future dissector
/// could attach; they are never constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExtensionKind {
    HttpRequest,
    HttpResponse,
    Dns,
    Sip,
    Ntp,
    Arp,
}

/// A typed annotation attached to a flow by exactly one dissector.
#[derive(Debug, Clone, Serialize)]
pub enum RecordExt {
    HttpRequest(HttpRequestExt),
    HttpResponse(HttpResponseExt),
}

impl RecordExt {
    pub fn kind(&self) -> ExtensionKind {
        match self {
            RecordExt::HttpRequest(_) => ExtensionKind::HttpRequest,
            RecordExt::HttpResponse(_) => ExtensionKind::HttpResponse,
        }
    }
}

/// An aggregated bidirectional flow, owned exclusively by the
/// [`crate::cache::FlowCache`] while live.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    pub ip_version: u8,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_proto: u8,

    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,

    pub pkt_total_cnt: u64,
    pub octet_total_length: u64,
    pub tcp_control_bits: u8,

    pub ip_tos: u8,
    pub ip_ttl: u8,

    #[serde(skip)]
    pub(crate) key: FlowKey,
    /// Whether the packet that created this record had its source as the
    /// key's `high` endpoint rather than `low`.
    #[serde(skip)]
    pub(crate) reversed: bool,

    extensions: Vec<RecordExt>,
}

impl FlowRecord {
    /// Creates a new record, populating key fields from the first packet
    /// of the flow in canonical order (src/dst exactly as observed, not
    /// reordered; only `reversed` records which endpoint became `low`).
    pub(crate) fn new(packet: &Packet, key: FlowKey, direction: Direction) -> Self {
        FlowRecord {
            ip_version: packet.ip_version,
            src_ip: packet.src_ip,
            dst_ip: packet.dst_ip,
            src_port: packet.src_port,
            dst_port: packet.dst_port,
            ip_proto: packet.ip_proto,
            start_timestamp: packet.timestamp,
            end_timestamp: packet.timestamp,
            pkt_total_cnt: 1,
            octet_total_length: packet.l3_len as u64,
            tcp_control_bits: packet.tcp_flags,
            ip_tos: packet.ip_tos,
            ip_ttl: packet.ip_ttl,
            key,
            reversed: matches!(direction, Direction::Reversed),
            extensions: Vec::new(),
        }
    }

    /// Folds a subsequent same-flow packet's fields into the aggregates.
    /// Does not touch extensions; that is the dissector hooks' job.
    pub(crate) fn update_aggregates(&mut self, packet: &Packet) {
        self.pkt_total_cnt += 1;
        self.octet_total_length += packet.l3_len as u64;
        self.tcp_control_bits |= packet.tcp_flags;
        self.end_timestamp = packet.timestamp;
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Returns the flow's extension of kind `kind`, if attached.
    pub fn get_extension(&self, kind: ExtensionKind) -> Option<&RecordExt> {
        self.extensions.iter().find(|e| e.kind() == kind)
    }

    /// Returns the flow's extension of kind `kind` for in-place mutation.
    pub fn get_extension_mut(&mut self, kind: ExtensionKind) -> Option<&mut RecordExt> {
        self.extensions.iter_mut().find(|e| e.kind() == kind)
    }

    /// Attaches a new extension. Panics (debug) / logs-and-replaces
    /// (release) if one of the same kind is already attached, since the
    /// one-per-kind invariant (`spec.md` §3) means this is a dissector bug,
    /// not a runtime condition.
    pub fn add_extension(&mut self, ext: RecordExt) {
        let kind = ext.kind();
        if let Some(existing) = self.extensions.iter().position(|e| e.kind() == kind) {
            debug_assert!(false, "duplicate extension kind {kind:?} attached");
            log::error!("duplicate extension kind {kind:?} attached; replacing");
            self.extensions[existing] = ext;
            return;
        }
        self.extensions.push(ext);
    }

    pub fn extensions(&self) -> &[RecordExt] {
        &self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::key::FlowKey;
    use std::net::Ipv4Addr;

    fn pkt() -> Packet<'static> {
        Packet {
            timestamp: Timestamp::new(0, 0),
            src_mac: [0; 6],
            dst_mac: [0; 6],
            ethertype: 0x0800,
            ip_version: 4,
            src_ip: Ipv4Addr::new(10, 0, 0, 1).into(),
            dst_ip: Ipv4Addr::new(10, 0, 0, 2).into(),
            ip_proto: 6,
            ip_tos: 0,
            ip_ttl: 64,
            src_port: 1000,
            dst_port: 2000,
            tcp_flags: 0,
            l3_len: 0,
            payload: &[],
            frame: &[],
        }
    }

    #[test]
    fn update_preserves_start_before_end() {
        let p = pkt();
        let (key, dir) = FlowKey::from_packet(&p);
        let mut r = FlowRecord::new(&p, key, dir);
        let mut p2 = pkt();
        p2.timestamp = Timestamp::new(5, 0);
        r.update_aggregates(&p2);
        assert_eq!(r.pkt_total_cnt, 2);
        assert!(r.start_timestamp <= r.end_timestamp);
    }
}
