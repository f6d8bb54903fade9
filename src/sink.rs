//! The exporter sink contract: the cache's only outlet for finished flows.
//!
//! The cache never knows about output channels; it hands every record to
//! the sink, which decides how to fan it out. [`JsonLinesSink`] is a
//! concrete, file-backed implementation used by the `ingest` binary and
//! exercised directly in tests; anything implementing [`ExporterSink`] can
//! stand in for it (a message-bus publisher, an in-memory collector, etc).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;

use crate::dissector::Dissector;
use crate::flow::{ExtensionKind, FlowRecord};
use crate::packet::Packet;

/// Consumes flows and stray per-packet telemetry leaving the cache.
///
/// `export_flow` is called for every record leaving live state, regardless
/// of why (timeout, LRU eviction, or dissector flush). `export_packet` is
/// for stateless dissectors with no per-flow extension to attach (an ARP
/// responder, say) that still want to emit something per packet.
pub trait ExporterSink {
    /// Called once before ingest begins, with the registered dissectors in
    /// order, so the sink can open one output channel per advertised
    /// extension kind plus a "basic flow" channel if any dissector asks
    /// for one via [`Dissector::includes_basic_flow`].
    fn init(&mut self, _dissectors: &[Box<dyn Dissector>]) -> anyhow::Result<()> {
        Ok(())
    }

    fn export_flow(&mut self, record: &FlowRecord) -> anyhow::Result<()>;

    fn export_packet(&mut self, _packet: &Packet) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes newline-delimited JSON: one file per extension-kind channel, plus
/// `basic.jsonl` for records with no attached extension at all.
pub struct JsonLinesSink {
    dir: PathBuf,
    basic: Option<BufWriter<File>>,
    channels: HashMap<ExtensionKind, BufWriter<File>>,
    /// Set by [`ExporterSink::init`] if any registered dissector's
    /// [`Dissector::includes_basic_flow`] returns `true`; when set, every
    /// record also goes to `basic.jsonl`, even one with extensions attached.
    always_basic: bool,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonLinesSink {
            dir: dir.into(),
            basic: None,
            channels: HashMap::new(),
            always_basic: false,
        }
    }

    fn channel_for(&mut self, kind: ExtensionKind) -> anyhow::Result<&mut BufWriter<File>> {
        if !self.channels.contains_key(&kind) {
            let name = format!("{kind:?}").to_lowercase();
            let path = self.dir.join(format!("{name}.jsonl"));
            let file =
                File::create(&path).with_context(|| format!("creating export channel {name}"))?;
            self.channels.insert(kind, BufWriter::new(file));
        }
        Ok(self.channels.get_mut(&kind).expect("just inserted"))
    }

    fn basic_writer(&mut self) -> anyhow::Result<&mut BufWriter<File>> {
        if self.basic.is_none() {
            let path = self.dir.join("basic.jsonl");
            let file = File::create(&path).context("creating basic export channel")?;
            self.basic = Some(BufWriter::new(file));
        }
        Ok(self.basic.as_mut().expect("just set"))
    }
}

impl ExporterSink for JsonLinesSink {
    fn init(&mut self, dissectors: &[Box<dyn Dissector>]) -> anyhow::Result<()> {
        self.always_basic = dissectors.iter().any(|d| d.includes_basic_flow());
        Ok(())
    }

    fn export_flow(&mut self, record: &FlowRecord) -> anyhow::Result<()> {
        let line = serde_json::to_string(record)?;
        if record.extensions().is_empty() {
            writeln!(self.basic_writer()?, "{line}")?;
        } else {
            if self.always_basic {
                writeln!(self.basic_writer()?, "{line}")?;
            }
            for ext in record.extensions() {
                writeln!(self.channel_for(ext.kind())?, "{line}")?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if let Some(w) = self.basic.as_mut() {
            w.flush()?;
        }
        for w in self.channels.values_mut() {
            w.flush()?;
        }
        Ok(())
    }
}
