//! The flow cache: a fixed-size, two-level associative structure with
//! per-line MRU ordering, lazy timeout expiry, and dissector hook
//! sequencing. This is the system's central component; everything else
//! (packet parsing, the dissector contract, the sink) exists to feed or
//! drain it.
//!
//! All mutation is synchronous and single-threaded; see `spec.md` §5.
//! Internally, [`FlowCache::put`] destructures `&mut self` into its
//! individual fields up front so the rest of the call can freely pass
//! disjoint borrows (`lines`, `dissectors`, `sink`, `stats`) to free
//! functions, rather than fighting the borrow checker over repeated
//! `self.method()` calls that each want the whole struct.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::dissector::{Dissector, HookStatus};
use crate::error::ConfigError;
use crate::flow::{Direction, FlowKey, FlowRecord};
use crate::packet::{Packet, Timestamp};
use crate::sink::ExporterSink;

struct Slot {
    key: FlowKey,
    hash: u64,
    record: FlowRecord,
}

struct Line {
    slots: VecDeque<Slot>,
}

/// Running counters for a [`FlowCache`]'s entire lifetime. Shared via `Rc`
/// with a registered [`crate::dissector::stats::StatsDissector`] so it can
/// report them without the cache exposing its internals.
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub packets_ingested: u64,
    pub hits: u64,
    pub misses: u64,
    pub lru_evictions: u64,
    pub inactive_timeouts: u64,
    pub active_timeouts: u64,
    pub flush_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpireReason {
    Inactive,
    Active,
    Forced,
}

/// The bounded, associative packet-to-flow cache.
///
/// `cache_size` total slots are arranged into `cache_size / line_size`
/// lines; a flow's line is chosen by hashing its canonical key, and within
/// a line, slots are linearly scanned and kept in most-recently-used
/// order. See `spec.md` §4.3.
pub struct FlowCache {
    lines: Vec<Line>,
    line_size: usize,
    active_timeout: f64,
    inactive_timeout: f64,
    dissectors: Vec<Box<dyn Dissector>>,
    sink: Box<dyn ExporterSink>,
    stats: Rc<RefCell<CacheStats>>,
}

impl FlowCache {
    pub fn new(
        cache_size: usize,
        line_size: usize,
        active_timeout: f64,
        inactive_timeout: f64,
        dissectors: Vec<Box<dyn Dissector>>,
        mut sink: Box<dyn ExporterSink>,
    ) -> Result<Self, ConfigError> {
        if line_size == 0 {
            return Err(ConfigError::ZeroLineSize);
        }
        if cache_size == 0 || cache_size % line_size != 0 {
            return Err(ConfigError::BadCacheShape { cache_size, line_size });
        }
        if !active_timeout.is_finite()
            || active_timeout < 0.0
            || !inactive_timeout.is_finite()
            || inactive_timeout < 0.0
        {
            return Err(ConfigError::BadTimeout);
        }

        if let Err(e) = sink.init(&dissectors) {
            log::error!("sink init failed: {e:#}");
        }

        let num_lines = cache_size / line_size;
        let lines = (0..num_lines)
            .map(|_| Line { slots: VecDeque::with_capacity(line_size) })
            .collect();

        Ok(FlowCache {
            lines,
            line_size,
            active_timeout,
            inactive_timeout,
            dissectors,
            sink,
            stats: Rc::new(RefCell::new(CacheStats::default())),
        })
    }

    /// A handle dissectors (e.g. `StatsDissector`) can hold to read the
    /// cache's live counters without borrowing the cache itself.
    pub fn stats_handle(&self) -> Rc<RefCell<CacheStats>> {
        Rc::clone(&self.stats)
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.borrow()
    }

    /// Appends a dissector after construction, for cases like
    /// [`crate::dissector::stats::StatsDissector`] that need a
    /// [`Self::stats_handle`] obtained from an already-built cache.
    /// Registration order among dissectors added this way follows
    /// insertion order, same as the constructor list.
    pub fn push_dissector(&mut self, dissector: Box<dyn Dissector>) {
        self.dissectors.push(dissector);
    }

    /// Total live records across all lines.
    pub fn len(&self) -> usize {
        self.lines.iter().map(|l| l.slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ingests one packet: expires the target line lazily, then looks up
    /// or creates a record and runs it through the dissector hook sequence
    /// described in `spec.md` §4.1.
    pub fn put(&mut self, packet: &Packet) {
        self.stats.borrow_mut().packets_ingested += 1;

        let (key, direction) = FlowKey::from_packet(packet);
        let hash = key.hash64();

        let FlowCache {
            lines,
            line_size,
            active_timeout,
            inactive_timeout,
            dissectors,
            sink,
            stats,
        } = self;
        let line_size = *line_size;
        let active_timeout = *active_timeout;
        let inactive_timeout = *inactive_timeout;
        let line_idx = (hash % lines.len() as u64) as usize;

        expire_line(
            lines,
            dissectors,
            sink,
            stats,
            line_idx,
            packet.timestamp,
            active_timeout,
            inactive_timeout,
        );

        match lines[line_idx].slots.iter().position(|s| s.hash == hash && s.key == key) {
            Some(pos) => {
                stats.borrow_mut().hits += 1;
                rotate_to_front(&mut lines[line_idx].slots, pos);
                handle_hit(lines, dissectors, sink, stats, line_idx, packet, line_size);
            }
            None => {
                stats.borrow_mut().misses += 1;
                handle_miss(lines, dissectors, sink, stats, line_idx, key, hash, direction, packet, line_size);
            }
        }
    }

    /// Sweeps every line for timed-out records. With `force=false`, the
    /// current wall clock is the reference (used when the ingest loop's
    /// packet source reports it is idle); with `force=true`, every live
    /// record is exported unconditionally (used on shutdown).
    pub fn export_expired(&mut self, force: bool) {
        let now = if force { None } else { Some(wall_clock_timestamp()) };

        let FlowCache {
            lines,
            active_timeout,
            inactive_timeout,
            dissectors,
            sink,
            stats,
            ..
        } = self;

        for line in lines.iter_mut() {
            let mut i = 0;
            while i < line.slots.len() {
                let reason = match now {
                    None => Some(ExpireReason::Forced),
                    Some(now) => classify(now, &line.slots[i].record, *active_timeout, *inactive_timeout),
                };
                if let Some(reason) = reason {
                    let slot = line.slots.remove(i).expect("index in bounds");
                    export_slot(dissectors, sink, slot.record);
                    bump(stats, reason);
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Drains the cache unconditionally, runs every dissector's `finish`,
    /// and closes the sink. Called once by the ingest loop on shutdown.
    pub fn finish(&mut self) {
        self.export_expired(true);
        for d in self.dissectors.iter_mut() {
            d.finish();
        }
        if let Err(e) = self.sink.close() {
            log::error!("sink close failed: {e:#}");
        }
    }
}

fn wall_clock_timestamp() -> Timestamp {
    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Timestamp::new(dur.as_secs(), dur.subsec_micros())
}

fn classify(
    now: Timestamp,
    record: &FlowRecord,
    active_timeout: f64,
    inactive_timeout: f64,
) -> Option<ExpireReason> {
    if now.since(record.end_timestamp) >= inactive_timeout {
        Some(ExpireReason::Inactive)
    } else if now.since(record.start_timestamp) >= active_timeout {
        Some(ExpireReason::Active)
    } else {
        None
    }
}

fn bump(stats: &Rc<RefCell<CacheStats>>, reason: ExpireReason) {
    let mut s = stats.borrow_mut();
    match reason {
        ExpireReason::Inactive => s.inactive_timeouts += 1,
        ExpireReason::Active => s.active_timeouts += 1,
        ExpireReason::Forced => {}
    }
}

fn rotate_to_front(slots: &mut VecDeque<Slot>, pos: usize) {
    let slot = slots.remove(pos).expect("pos in bounds");
    slots.push_front(slot);
}

fn export_slot(dissectors: &mut [Box<dyn Dissector>], sink: &mut Box<dyn ExporterSink>, mut record: FlowRecord) {
    for d in dissectors.iter_mut() {
        d.pre_export(&mut record);
    }
    if let Err(e) = sink.export_flow(&record) {
        log::error!("sink export_flow failed: {e:#}");
    }
}

/// Applies timeout expiry to one line, relative to `now` (the timestamp of
/// the packet currently being ingested, per `spec.md` §4.3's lazy sweep).
fn expire_line(
    lines: &mut [Line],
    dissectors: &mut [Box<dyn Dissector>],
    sink: &mut Box<dyn ExporterSink>,
    stats: &Rc<RefCell<CacheStats>>,
    line_idx: usize,
    now: Timestamp,
    active_timeout: f64,
    inactive_timeout: f64,
) {
    let mut i = 0;
    while i < lines[line_idx].slots.len() {
        let reason = classify(now, &lines[line_idx].slots[i].record, active_timeout, inactive_timeout);
        if let Some(reason) = reason {
            let slot = lines[line_idx].slots.remove(i).expect("index in bounds");
            export_slot(dissectors, sink, slot.record);
            bump(stats, reason);
        } else {
            i += 1;
        }
    }
}

fn handle_hit(
    lines: &mut [Line],
    dissectors: &mut [Box<dyn Dissector>],
    sink: &mut Box<dyn ExporterSink>,
    stats: &Rc<RefCell<CacheStats>>,
    line_idx: usize,
    packet: &Packet,
    line_size: usize,
) {
    let status = run_hooks(dissectors, &mut lines[line_idx].slots[0].record, packet, |d, r, p| d.pre_update(r, p));
    if status != HookStatus::Ok {
        flush_and_recreate(lines, dissectors, sink, stats, line_idx, packet, line_size);
        return;
    }

    lines[line_idx].slots[0].record.update_aggregates(packet);

    let status = run_hooks(dissectors, &mut lines[line_idx].slots[0].record, packet, |d, r, p| d.post_update(r, p));
    if status != HookStatus::Ok {
        flush_and_recreate(lines, dissectors, sink, stats, line_idx, packet, line_size);
    }
}

fn run_hooks(
    dissectors: &mut [Box<dyn Dissector>],
    record: &mut FlowRecord,
    packet: &Packet,
    call: impl Fn(&mut Box<dyn Dissector>, &mut FlowRecord, &Packet) -> HookStatus,
) -> HookStatus {
    for d in dissectors.iter_mut() {
        let status = call(d, record, packet);
        if status != HookStatus::Ok {
            return status;
        }
    }
    HookStatus::Ok
}

/// Exports the record at the front of the line (the one whose hooks just
/// requested `FLUSH`/`FLUSH_WITH_REINSERT`) and creates a fresh record for
/// the same triggering packet, running `post_create` on it exactly as a
/// genuine cache miss would. `spec.md` draws a line between `FLUSH` and
/// `FLUSH_WITH_REINSERT`, but since the triggering packet is always the new
/// record's first packet regardless of which status was returned, both are
/// handled identically here; see `DESIGN.md`.
fn flush_and_recreate(
    lines: &mut [Line],
    dissectors: &mut [Box<dyn Dissector>],
    sink: &mut Box<dyn ExporterSink>,
    stats: &Rc<RefCell<CacheStats>>,
    line_idx: usize,
    packet: &Packet,
    line_size: usize,
) {
    stats.borrow_mut().flush_events += 1;
    let slot = lines[line_idx].slots.pop_front().expect("hit slot is present");
    export_slot(dissectors, sink, slot.record);

    let (key, direction) = FlowKey::from_packet(packet);
    let hash = key.hash64();
    handle_miss(lines, dissectors, sink, stats, line_idx, key, hash, direction, packet, line_size);
}

fn handle_miss(
    lines: &mut [Line],
    dissectors: &mut [Box<dyn Dissector>],
    sink: &mut Box<dyn ExporterSink>,
    stats: &Rc<RefCell<CacheStats>>,
    line_idx: usize,
    key: FlowKey,
    hash: u64,
    direction: Direction,
    packet: &Packet,
    line_size: usize,
) {
    if lines[line_idx].slots.len() >= line_size {
        stats.borrow_mut().lru_evictions += 1;
        let victim = lines[line_idx].slots.pop_back().expect("line at capacity");
        export_slot(dissectors, sink, victim.record);
    }

    let mut record = FlowRecord::new(packet, key, direction);
    for d in dissectors.iter_mut() {
        let status = d.post_create(&mut record, packet);
        if status != HookStatus::Ok {
            log::warn!("dissector requested {status:?} during post_create; ignoring, nothing live to flush");
        }
    }
    lines[line_idx].slots.push_front(Slot { key, hash, record });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::tcp_flags;
    use std::cell::RefCell as StdRefCell;
    use std::net::Ipv4Addr;
    use std::rc::Rc as StdRc;

    #[derive(Default)]
    struct CollectingSink {
        exported: StdRc<StdRefCell<Vec<FlowRecord>>>,
    }

    impl ExporterSink for CollectingSink {
        fn export_flow(&mut self, record: &FlowRecord) -> anyhow::Result<()> {
            self.exported.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn pkt(
        t: (u64, u32),
        src: &str,
        sport: u16,
        dst: &str,
        dport: u16,
        flags: u8,
    ) -> Packet<'static> {
        Packet {
            timestamp: Timestamp::new(t.0, t.1),
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
            tcp_flags: flags,
            l3_len: 0,
            payload: &[],
            frame: &[],
        }
    }

    fn cache_with(
        cache_size: usize,
        line_size: usize,
        active_timeout: f64,
        inactive_timeout: f64,
    ) -> (FlowCache, StdRc<StdRefCell<Vec<FlowRecord>>>) {
        let exported = StdRc::new(StdRefCell::new(Vec::new()));
        let sink = Box::new(CollectingSink { exported: StdRc::clone(&exported) });
        let cache = FlowCache::new(cache_size, line_size, active_timeout, inactive_timeout, Vec::new(), sink).unwrap();
        (cache, exported)
    }

    #[test]
    fn rejects_non_multiple_cache_shape() {
        let err = FlowCache::new(10, 3, 1.0, 1.0, Vec::new(), Box::new(CollectingSink::default()));
        assert!(matches!(err, Err(ConfigError::BadCacheShape { .. })));
    }

    #[test]
    fn rejects_zero_line_size() {
        let err = FlowCache::new(10, 0, 1.0, 1.0, Vec::new(), Box::new(CollectingSink::default()));
        assert!(matches!(err, Err(ConfigError::ZeroLineSize)));
    }

    #[test]
    fn repeated_packet_updates_same_record() {
        let (mut cache, exported) = cache_with(32, 32, 300.0, 30.0);
        let p1 = pkt((0, 0), "10.0.0.1", 1000, "10.0.0.2", 80, tcp_flags::SYN);
        let p2 = pkt((1, 0), "10.0.0.1", 1000, "10.0.0.2", 80, tcp_flags::ACK);
        cache.put(&p1);
        cache.put(&p2);
        assert_eq!(cache.len(), 1);
        cache.finish();
        let recs = exported.borrow();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pkt_total_cnt, 2);
        assert_eq!(recs[0].tcp_control_bits, tcp_flags::SYN | tcp_flags::ACK);
    }

    #[test]
    fn direction_independent_hit() {
        let (mut cache, exported) = cache_with(32, 32, 300.0, 30.0);
        let p1 = pkt((0, 0), "10.0.0.1", 1000, "10.0.0.2", 2000, 0);
        let p2 = pkt((1, 0), "10.0.0.2", 2000, "10.0.0.1", 1000, 0);
        cache.put(&p1);
        cache.put(&p2);
        assert_eq!(cache.len(), 1);
        cache.finish();
        assert_eq!(exported.borrow()[0].pkt_total_cnt, 2);
    }

    #[test]
    fn lru_eviction_keeps_most_recent_two() {
        // Three distinct flows forced into the same (sole) line.
        let (mut cache, exported) = cache_with(2, 2, 300.0, 30.0);
        let p1 = pkt((0, 0), "10.0.0.1", 1, "10.0.0.9", 9, 0);
        let p2 = pkt((1, 0), "10.0.0.2", 2, "10.0.0.9", 9, 0);
        let p3 = pkt((2, 0), "10.0.0.3", 3, "10.0.0.9", 9, 0);
        cache.put(&p1);
        cache.put(&p2);
        cache.put(&p3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().lru_evictions, 1);
        cache.finish();
        // p1's flow was the LRU victim and should have been exported first.
        let recs = exported.borrow();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].src_port, 1);
    }

    #[test]
    fn inactive_timeout_expires_on_next_put_to_same_line() {
        let (mut cache, exported) = cache_with(1, 1, 300.0, 10.0);
        let p1 = pkt((0, 0), "10.0.0.1", 1, "10.0.0.2", 2, 0);
        let p2 = pkt((10, 0), "10.0.0.3", 3, "10.0.0.4", 4, 0);
        cache.put(&p1);
        cache.put(&p2);
        assert_eq!(cache.stats().inactive_timeouts, 1);
        cache.finish();
        assert_eq!(exported.borrow().len(), 2);
    }

    #[test]
    fn force_export_drains_everything() {
        let (mut cache, exported) = cache_with(32, 32, 300.0, 30.0);
        for i in 0..5u16 {
            let p = pkt((0, 0), "10.0.0.1", i, "10.0.0.2", 80, 0);
            cache.put(&p);
        }
        assert_eq!(cache.len(), 5);
        cache.export_expired(true);
        assert!(cache.is_empty());
        assert_eq!(exported.borrow().len(), 5);
    }
}
