//! Multiplexes exported basic-flow records from several input streams
//! into a single output stream, the Rust-idiomatic single-process stand-in
//! for the original flow meter's separate `merger` binary (`merger.c`).
//!
//! The original is a NEMEA/TRAP module: one OpenMP reader thread per input
//! interface feeding a shared buffer, and one sender thread draining it.
//! It ships two modes, selected by its `-T` flag:
//!
//! - *normal* (default): records are resent in arrival order, interleaved
//!   however the reader threads happen to race (`capture_thread`).
//! - *timestamp aware* (`-T`): the sender repeatedly pulls the
//!   minimum-timestamped record buffered across all interfaces
//!   (`ta_capture_thread`, `get_min_rec`), ordering the merged stream by
//!   either `TIME_FIRST` or `TIME_LAST` depending on its `-F` flag
//!   (`TS_FIRST`/`TS_LAST`).
//!
//! This crate has no threads or TRAP buffering to reproduce (out of scope
//! per `spec.md` §5's single-threaded model), so both modes collapse to a
//! deterministic function over already-collected `Vec<ExportedFlow>`
//! streams: [`multiplex_arrival_order`] and [`multiplex_by_timestamp`].

use serde::{Deserialize, Serialize};

use crate::packet::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportedFlow {
    pub ip_version: u8,
    pub src_ip: std::net::IpAddr,
    pub dst_ip: std::net::IpAddr,
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
}

impl From<&crate::flow::FlowRecord> for ExportedFlow {
    fn from(r: &crate::flow::FlowRecord) -> Self {
        ExportedFlow {
            ip_version: r.ip_version,
            src_ip: r.src_ip,
            dst_ip: r.dst_ip,
            src_port: r.src_port,
            dst_port: r.dst_port,
            ip_proto: r.ip_proto,
            start_timestamp: r.start_timestamp,
            end_timestamp: r.end_timestamp,
            pkt_total_cnt: r.pkt_total_cnt,
            octet_total_length: r.octet_total_length,
            tcp_control_bits: r.tcp_control_bits,
            ip_tos: r.ip_tos,
            ip_ttl: r.ip_ttl,
        }
    }
}

/// Which timestamp field orders records in [`multiplex_by_timestamp`],
/// mirroring `merger.c`'s `TS_FIRST`/`TS_LAST` constants (selected there
/// by the `-F` flag; `TS_LAST` is the original's default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSelector {
    First,
    Last,
}

impl TimestampSelector {
    fn key(self, flow: &ExportedFlow) -> Timestamp {
        match self {
            TimestampSelector::First => flow.start_timestamp,
            TimestampSelector::Last => flow.end_timestamp,
        }
    }
}

/// "Normal" mode: concatenates streams in the order given, each stream's
/// internal order preserved. `merger.c`'s `capture_thread` resends records
/// as they arrive on each interface with no cross-interface ordering
/// guarantee at all; concatenation is the single-process equivalent once
/// there is no longer a race between reader threads to model.
pub fn multiplex_arrival_order(streams: Vec<Vec<ExportedFlow>>) -> Vec<ExportedFlow> {
    streams.into_iter().flatten().collect()
}

/// "Timestamp aware" mode: repeatedly takes the minimum-timestamped record
/// across all streams, mirroring `get_min_rec`'s scan over the buffered
/// heads of every input interface. Ties keep the lower-indexed stream's
/// record first, matching a left-to-right linear scan for the minimum.
pub fn multiplex_by_timestamp(
    streams: Vec<Vec<ExportedFlow>>,
    selector: TimestampSelector,
) -> Vec<ExportedFlow> {
    let mut cursors: Vec<_> = streams.into_iter().map(|s| s.into_iter().peekable()).collect();
    let mut out = Vec::new();

    loop {
        let mut min_idx = None;
        let mut min_ts: Option<Timestamp> = None;
        for (i, cursor) in cursors.iter_mut().enumerate() {
            if let Some(flow) = cursor.peek() {
                let ts = selector.key(flow);
                let is_new_min = match min_ts {
                    Some(m) => ts < m,
                    None => true,
                };
                if is_new_min {
                    min_ts = Some(ts);
                    min_idx = Some(i);
                }
            }
        }
        let Some(i) = min_idx else { break };
        out.push(cursors[i].next().expect("peeked"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(src_port: u16, start: u64, end: u64) -> ExportedFlow {
        ExportedFlow {
            ip_version: 4,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port,
            dst_port: 80,
            ip_proto: 6,
            start_timestamp: Timestamp::new(start, 0),
            end_timestamp: Timestamp::new(end, 0),
            pkt_total_cnt: 1,
            octet_total_length: 100,
            tcp_control_bits: 0,
            ip_tos: 0,
            ip_ttl: 64,
        }
    }

    #[test]
    fn arrival_order_concatenates_streams_in_order() {
        let a = vec![flow(1, 5, 6), flow(2, 0, 1)];
        let b = vec![flow(3, 10, 11)];
        let merged = multiplex_arrival_order(vec![a.clone(), b.clone()]);
        assert_eq!(merged, [a, b].concat());
    }

    #[test]
    fn timestamp_aware_interleaves_by_start_time() {
        let a = vec![flow(1, 0, 5), flow(1, 10, 15)];
        let b = vec![flow(2, 5, 6), flow(2, 20, 21)];
        let merged = multiplex_by_timestamp(vec![a, b], TimestampSelector::First);
        let starts: Vec<u64> = merged.iter().map(|f| f.start_timestamp.secs).collect();
        assert_eq!(starts, [0, 5, 10, 20]);
    }

    #[test]
    fn timestamp_aware_can_order_by_end_time_instead() {
        // Same start but b finishes first, so TS_LAST should place it first.
        let a = vec![flow(1, 0, 20)];
        let b = vec![flow(2, 0, 5)];
        let merged = multiplex_by_timestamp(vec![a, b], TimestampSelector::Last);
        assert_eq!(merged[0].src_port, 2);
        assert_eq!(merged[1].src_port, 1);
    }

    #[test]
    fn ties_prefer_the_lower_indexed_stream() {
        let a = vec![flow(1, 0, 0)];
        let b = vec![flow(2, 0, 0)];
        let merged = multiplex_by_timestamp(vec![a, b], TimestampSelector::First);
        assert_eq!(merged[0].src_port, 1);
        assert_eq!(merged[1].src_port, 2);
    }

    #[test]
    fn empty_streams_produce_empty_output() {
        let merged: Vec<ExportedFlow> =
            multiplex_by_timestamp(vec![vec![], vec![]], TimestampSelector::First);
        assert!(merged.is_empty());
    }
}
