//! The protocol-dissector plugin contract.
//!
//! A [`Dissector`] is invoked by the [`crate::cache::FlowCache`] at fixed
//! points in a packet's processing (see `spec.md` §4.1 for the full
//! ordering). It reads and mutates only the extension(s) it owns, located
//! via [`crate::flow::FlowRecord::get_extension`].

pub mod http;
pub mod stats;

use crate::flow::{ExtensionKind, FlowRecord};
use crate::packet::Packet;

/// The outcome of a single hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// Continue normally.
    Ok,
    /// Export the current flow immediately and create a new one for the
    /// triggering packet.
    Flush,
    /// Same as `Flush`, but the triggering packet is replayed against the
    /// freshly created flow.
    FlushWithReinsert,
}

/// A protocol-specific plugin that inspects packets and mutates flow
/// extensions.
///
/// All hooks default to no-ops so a dissector only needs to implement the
/// ones relevant to it (e.g. [`stats::StatsDissector`] only implements
/// [`Dissector::finish`]).
pub trait Dissector {
    /// Called once, in registration order, when a packet creates a new
    /// flow record.
    fn post_create(&mut self, _record: &mut FlowRecord, _packet: &Packet) -> HookStatus {
        HookStatus::Ok
    }

    /// Called, in registration order, before the cache folds a packet's
    /// fields into an existing record's aggregates.
    fn pre_update(&mut self, _record: &mut FlowRecord, _packet: &Packet) -> HookStatus {
        HookStatus::Ok
    }

    /// Called, in registration order, after the cache folds a packet's
    /// fields into an existing record's aggregates.
    fn post_update(&mut self, _record: &mut FlowRecord, _packet: &Packet) -> HookStatus {
        HookStatus::Ok
    }

    /// Called for cleanup immediately before a record leaves live state,
    /// regardless of why (timeout, LRU eviction, or flush).
    fn pre_export(&mut self, _record: &mut FlowRecord) {}

    /// Called once on cache shutdown, after all live records have been
    /// drained, to report final statistics.
    fn finish(&mut self) {}

    /// Extension kinds this dissector may attach. Used by an
    /// [`crate::sink::ExporterSink`] to decide which output channel a
    /// record belongs to.
    fn advertised_extension_kinds(&self) -> &'static [ExtensionKind] {
        &[]
    }

    /// A short name identifying this dissector's output schema, e.g.
    /// `"http_request.v1"`. Appended to exported records bearing its
    /// extension; the wire encoding itself is the sink's concern.
    fn advertised_output_schema(&self) -> &'static str {
        ""
    }

    /// Whether this dissector wants every flow delivered to a "basic flow"
    /// output channel even when none of its extensions are attached (used
    /// by [`stats::StatsDissector`], which has no extension kind at all).
    fn includes_basic_flow(&self) -> bool {
        false
    }
}
