//! Periodic cache-statistics reporter.
//!
//! Unlike every other dissector, `StatsDissector` does not attach
//! extensions; it is registered purely to get a hook call on every
//! packet so it can check a wall-clock interval and log the cache's
//! running counters, matching the original flow meter's
//! `-S`/`cache-statistics` flag (`flow_meter.cpp`).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{Dissector, HookStatus};
use crate::cache::CacheStats;
use crate::flow::FlowRecord;
use crate::packet::Packet;

pub struct StatsDissector {
    stats: Rc<RefCell<CacheStats>>,
    interval: Duration,
    last_print: Instant,
}

impl StatsDissector {
    pub fn new(stats: Rc<RefCell<CacheStats>>, interval: Duration) -> Self {
        StatsDissector {
            stats,
            interval,
            last_print: Instant::now(),
        }
    }

    fn maybe_print(&mut self) {
        if self.last_print.elapsed() >= self.interval {
            self.print();
            self.last_print = Instant::now();
        }
    }

    fn print(&self) {
        let s = self.stats.borrow();
        log::info!(
            "cache stats: ingested={} hits={} misses={} lru_evictions={} \
             inactive_timeouts={} active_timeouts={} flush_events={}",
            s.packets_ingested,
            s.hits,
            s.misses,
            s.lru_evictions,
            s.inactive_timeouts,
            s.active_timeouts,
            s.flush_events,
        );
    }
}

impl Dissector for StatsDissector {
    fn post_create(&mut self, _record: &mut FlowRecord, _packet: &Packet) -> HookStatus {
        self.maybe_print();
        HookStatus::Ok
    }

    fn post_update(&mut self, _record: &mut FlowRecord, _packet: &Packet) -> HookStatus {
        self.maybe_print();
        HookStatus::Ok
    }

    fn finish(&mut self) {
        self.print();
    }

    fn includes_basic_flow(&self) -> bool {
        true
    }
}
