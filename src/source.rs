//! The packet source contract (`spec.md` §6) and two concrete
//! implementations built on the `pcap` crate, the same one
//! `retina-core::runtime::offline` reads capture files with.
//!
//! A source hands back raw frame bytes plus a capture timestamp rather
//! than an already-parsed [`crate::packet::Packet`]: parsing borrows from
//! the frame buffer, and threading that borrow back through a trait
//! method is more trouble than it's worth when the source can just hand
//! over an owned `Vec<u8>` per packet instead.

use crate::error::SourceError;
use crate::packet::Timestamp;

/// One outcome of polling a [`PacketSource`].
pub enum SourceEvent {
    /// The source is exhausted (end of capture file).
    Eof,
    /// The source is alive but had nothing to offer within its poll
    /// interval. The ingest loop treats this as a cue to run
    /// `export_expired(false)`.
    Timeout,
    /// One captured frame.
    Packet { timestamp: Timestamp, frame: Vec<u8> },
}

pub trait PacketSource {
    fn get_packet(&mut self) -> anyhow::Result<SourceEvent>;

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reads packets from a capture file, in file order, once.
pub struct PcapFileSource {
    cap: pcap::Capture<pcap::Offline>,
}

impl PcapFileSource {
    pub fn open_file(path: &str) -> Result<Self, SourceError> {
        let cap = pcap::Capture::from_file(path).map_err(|e| SourceError::Open {
            path: path.to_string(),
            source: e,
        })?;
        Ok(PcapFileSource { cap })
    }
}

impl PacketSource for PcapFileSource {
    fn get_packet(&mut self) -> anyhow::Result<SourceEvent> {
        match self.cap.next_packet() {
            Ok(p) => {
                let ts = Timestamp::new(p.header.ts.tv_sec as u64, p.header.ts.tv_usec as u32);
                Ok(SourceEvent::Packet { timestamp: ts, frame: p.data.to_vec() })
            }
            Err(pcap::Error::NoMorePackets) => Ok(SourceEvent::Eof),
            Err(pcap::Error::TimeoutExpired) => Ok(SourceEvent::Timeout),
            Err(e) => Err(SourceError::Read(e).into()),
        }
    }
}

/// Reads packets from a live interface, blocking up to `timeout` per poll.
/// `get_packet` returns [`SourceEvent::Timeout`] rather than blocking
/// indefinitely, so the ingest loop stays responsive to the stop flag and
/// can sweep expired flows while idle.
pub struct PcapLiveSource {
    cap: pcap::Capture<pcap::Active>,
}

impl PcapLiveSource {
    pub fn init_interface(name: &str, timeout_ms: i32) -> Result<Self, SourceError> {
        let cap = pcap::Capture::from_device(name)
            .map_err(|e| SourceError::Open { path: name.to_string(), source: e })?
            .promisc(true)
            .timeout(timeout_ms)
            .open()
            .map_err(|e| SourceError::Open { path: name.to_string(), source: e })?;
        Ok(PcapLiveSource { cap })
    }
}

impl PacketSource for PcapLiveSource {
    fn get_packet(&mut self) -> anyhow::Result<SourceEvent> {
        match self.cap.next_packet() {
            Ok(p) => {
                let ts = Timestamp::new(p.header.ts.tv_sec as u64, p.header.ts.tv_usec as u32);
                Ok(SourceEvent::Packet { timestamp: ts, frame: p.data.to_vec() })
            }
            Err(pcap::Error::TimeoutExpired) => Ok(SourceEvent::Timeout),
            Err(e) => Err(SourceError::Read(e).into()),
        }
    }
}
