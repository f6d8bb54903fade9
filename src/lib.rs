//! A bounded flow aggregation engine.
//!
//! Groups captured packets into bidirectional flows in a fixed-size,
//! two-level associative cache (see [`cache::FlowCache`]), runs them
//! through a pipeline of pluggable protocol dissectors (see
//! [`dissector::Dissector`]), and exports completed flows through an
//! [`sink::ExporterSink`] once they are timed out, evicted, or flushed.
//!
//! The crate is a library plus two small binaries: `ingest` wires a
//! [`source::PacketSource`], a [`cache::FlowCache`], and a
//! [`sink::ExporterSink`] together and drives [`ingest::IngestLoop`];
//! `merge` post-processes two exported record streams (see [`merge`]).

pub mod cache;
pub mod config;
pub mod dissector;
pub mod error;
pub mod flow;
pub mod ingest;
pub mod merge;
pub mod packet;
pub mod sink;
pub mod source;
