//! The ingest loop: the thin, single-threaded driver that pulls packets
//! from a [`PacketSource`], applies sampling, and feeds the
//! [`FlowCache`]. Everything interesting happens downstream of `put()`;
//! this module's only job is the straight-line loop and the two places
//! the outside world can interrupt it (a `TIMEOUT` from the source, or a
//! stop signal).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cache::FlowCache;
use crate::packet::Packet;
use crate::source::{PacketSource, SourceEvent};

/// Drives one packet source into one cache until EOF, a packet limit, or a
/// stop signal. RNG is seeded once at construction, matching the original
/// flow meter's single `srand(time(NULL))` call (`spec.md` §11.3):
/// sampling has no per-packet reseeding and no thread-safety concerns
/// under the single-threaded model (`spec.md` §5).
pub struct IngestLoop<S: PacketSource> {
    source: S,
    cache: FlowCache,
    rng: StdRng,
    sampling_probability: u32,
    packet_limit: u64,
    admitted: u64,
    stop: Arc<AtomicBool>,
}

impl<S: PacketSource> IngestLoop<S> {
    /// Installs a `SIGINT`/`SIGTERM` handler that flips a shared flag,
    /// polled once per loop iteration (`spec.md` §9: re-architected from a
    /// global `stop` flag into one owned by the driver).
    pub fn new(source: S, cache: FlowCache, sampling_probability: u32, packet_limit: u64) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&stop);
        ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
            .context("installing signal handler")?;

        Ok(IngestLoop {
            source,
            cache,
            rng: StdRng::from_entropy(),
            sampling_probability,
            packet_limit,
            admitted: 0,
            stop,
        })
    }

    /// For tests and any caller that wants to drive the loop without a
    /// real signal handler (installing one twice in a single process
    /// panics).
    pub fn with_stop_flag(
        source: S,
        cache: FlowCache,
        sampling_probability: u32,
        packet_limit: u64,
        stop: Arc<AtomicBool>,
    ) -> Self {
        IngestLoop {
            source,
            cache,
            rng: StdRng::from_entropy(),
            sampling_probability,
            packet_limit,
            admitted: 0,
            stop,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                log::info!("stop signal received, shutting down");
                break;
            }
            if self.packet_limit != 0 && self.admitted >= self.packet_limit {
                log::info!("packet_limit {} reached", self.packet_limit);
                break;
            }

            match self.source.get_packet()? {
                SourceEvent::Eof => {
                    log::info!("packet source exhausted");
                    break;
                }
                SourceEvent::Timeout => {
                    self.cache.export_expired(false);
                }
                SourceEvent::Packet { timestamp, frame } => {
                    if !self.admit() {
                        continue;
                    }
                    match Packet::parse_frame(&frame, timestamp) {
                        Some(packet) => {
                            self.cache.put(&packet);
                            self.admitted += 1;
                        }
                        None => log::debug!("dropped unparseable frame ({} bytes)", frame.len()),
                    }
                }
            }
        }

        self.cache.finish();
        self.source.close()?;
        Ok(())
    }

    /// `true` iff a uniform draw in `[1, 100]` is `<= sampling_probability`.
    /// A probability of `100` always admits without drawing, matching the
    /// "no sampling" default exactly rather than relying on the draw's
    /// range to make it so.
    fn admit(&mut self) -> bool {
        if self.sampling_probability >= 100 {
            return true;
        }
        self.rng.gen_range(1..=100) <= self.sampling_probability
    }

    pub fn cache(&self) -> &FlowCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowRecord;
    use crate::sink::ExporterSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct VecSource {
        frames: std::vec::IntoIter<Vec<u8>>,
    }

    impl PacketSource for VecSource {
        fn get_packet(&mut self) -> anyhow::Result<SourceEvent> {
            match self.frames.next() {
                Some(frame) => Ok(SourceEvent::Packet { timestamp: crate::packet::Timestamp::new(0, 0), frame }),
                None => Ok(SourceEvent::Eof),
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        count: Rc<RefCell<u64>>,
    }

    impl ExporterSink for CountingSink {
        fn export_flow(&mut self, _record: &FlowRecord) -> anyhow::Result<()> {
            *self.count.borrow_mut() += 1;
            Ok(())
        }
    }

    fn ethernet_ipv4_tcp_syn(src_port: u16) -> Vec<u8> {
        // A minimal well-formed Ethernet/IPv4/TCP SYN with no payload, hand
        // assembled: 14-byte Ethernet header, 20-byte IPv4 header (no
        // options), 20-byte TCP header (no options).
        let mut frame = vec![0u8; 14 + 20 + 20];
        frame[12] = 0x08;
        frame[14] = 0x45; // version/IHL
        frame[16] = 0x00;
        frame[17] = 40; // total length
        frame[23] = 6; // protocol = TCP
        frame[26..30].copy_from_slice(&[10, 0, 0, 1]);
        frame[30..34].copy_from_slice(&[10, 0, 0, 2]);
        let tcp = &mut frame[34..54];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[12] = 5 << 4; // data offset
        tcp[13] = crate::packet::tcp_flags::SYN;
        frame
    }

    #[test]
    fn packet_limit_stops_ingest_early() {
        let frames: Vec<Vec<u8>> = (0..10).map(ethernet_ipv4_tcp_syn).collect();
        let source = VecSource { frames: frames.into_iter() };
        let count = Rc::new(RefCell::new(0u64));
        let sink = Box::new(CountingSink { count: Rc::clone(&count) });
        let cache = FlowCache::new(32, 32, 300.0, 30.0, Vec::new(), sink).unwrap();
        let mut loop_ = IngestLoop::with_stop_flag(source, cache, 100, 3, Arc::new(AtomicBool::new(false)));
        loop_.run().unwrap();
        assert_eq!(loop_.admitted, 3);
    }

    #[test]
    fn sampling_boundaries_are_deterministic() {
        let mut loop_ = IngestLoop::with_stop_flag(
            VecSource { frames: Vec::new().into_iter() },
            FlowCache::new(32, 32, 300.0, 30.0, Vec::new(), Box::new(CountingSink::default())).unwrap(),
            100,
            0,
            Arc::new(AtomicBool::new(false)),
        );
        for _ in 0..50 {
            assert!(loop_.admit());
        }

        let mut none = IngestLoop::with_stop_flag(
            VecSource { frames: Vec::new().into_iter() },
            FlowCache::new(32, 32, 300.0, 30.0, Vec::new(), Box::new(CountingSink::default())).unwrap(),
            0,
            0,
            Arc::new(AtomicBool::new(false)),
        );
        for _ in 0..50 {
            assert!(!none.admit());
        }
    }
}
