// MrcSleuth - core/collab.rs
//
// Interfaces to the collaborators the engine hands data to but never
// depends on: fault signalling hardware and margin analytics.
// Implementations live in the app layer or in embedding programs.

use crate::core::model::{ClosedBlock, FaultEvent, NodeConfig};
use crate::core::store::MemoryRecord;

/// Consumer of fault events, e.g. an LED board next to the DIMM slots.
///
/// Called synchronously for every event. Implementations must not fail the
/// run: anything they cannot handle is theirs to log and drop.
pub trait FaultSignal {
    fn signal(&mut self, event: &FaultEvent);
}

/// A fault signal that only logs. Used when no hardware is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySignal;

impl FaultSignal for LogOnlySignal {
    fn signal(&mut self, event: &FaultEvent) {
        tracing::info!(
            device = %event.device,
            severity = %event.severity,
            block = %event.block,
            "Fault detected"
        );
    }
}

/// Rank margin analytics. Opaque to the engine: it receives margin result
/// blocks as they close and answers two questions once the memory picture is
/// complete.
pub trait MarginAnalyzer {
    /// Take in one margin results block.
    fn ingest(&mut self, block: &ClosedBlock, store: &MemoryRecord);

    /// True when margin results exist for every installed rank.
    fn result_completeness(&mut self, store: &MemoryRecord) -> bool;

    /// True when the measured margins qualify the platform.
    fn qualify(&mut self, store: &MemoryRecord, node: &NodeConfig) -> bool;
}
