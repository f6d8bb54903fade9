//! The associative key and the aggregated bidirectional flow record.

pub mod key;
pub mod record;

pub use key::{Direction, Endpoint, FlowKey};
pub use record::{ExtensionKind, FlowRecord, RecordExt};
