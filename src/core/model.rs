// MrcSleuth - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no
// platform dependencies. These types are the shared vocabulary between the
// segmenter, the extractors, the resolver and the report.

use crate::util::constants;
use crate::util::error::ExtractError;
use serde::{Deserialize, Serialize};

// =============================================================================
// Severity
// =============================================================================

/// Severity of a fault signature found on the console.
///
/// Determined by the kind of block the signature was found in, not by the
/// text of the line itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Training failure or runtime memory error: the DIMM is suspect.
    Critical,
    /// Memory test failure: worth a look, not necessarily fatal.
    Warning,
}

impl Severity {
    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Fault event
// =============================================================================

/// A fault signature recognised inside a block, e.g. a failed rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultEvent {
    /// Device identity as printed by MRC, e.g. `N0.C2.D1.R0`.
    pub device: String,

    /// Severity implied by the block kind.
    pub severity: Severity,

    /// Identity of the block the signature was found in.
    pub block: String,
}

// =============================================================================
// Node configuration
// =============================================================================

/// Expected memory population of the machine under test. Ground truth for
/// the completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeConfig {
    /// Populated CPU sockets.
    pub sockets_count: usize,

    /// Populated memory channels on each socket.
    pub channels_count: usize,

    /// Installed DIMMs across the whole node.
    pub dimms_count: usize,

    /// DIMM slots per channel.
    pub dimm_per_channel: usize,

    /// Plan-of-record memory frequency in MT/s.
    pub por_ram_freq: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sockets_count: constants::DEFAULT_SOCKETS_COUNT,
            channels_count: constants::DEFAULT_CHANNELS_COUNT,
            dimms_count: constants::DEFAULT_DIMMS_COUNT,
            dimm_per_channel: constants::DEFAULT_DIMM_PER_CHANNEL,
            por_ram_freq: constants::DEFAULT_POR_RAM_FREQ,
        }
    }
}

// =============================================================================
// Closed block (segmenter output)
// =============================================================================

/// How a block came to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Closure {
    /// The block's own end marker was seen.
    EndMarker,

    /// A fatal-error sentinel forced the block closed; the body is partial.
    FatalMarker,
}

/// A block popped off the segmenter stack, ready for its extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedBlock {
    /// Identity captured from the start marker, e.g. `SOCKET_0_TABLE`.
    pub identity: String,

    /// Extractor kind bound to the identity.
    pub kind: crate::core::registry::BlockKind,

    /// Digits of the identity, e.g. `0` for `SOCKET_0_TABLE`.
    pub qualifier: Option<u32>,

    /// Buffered body lines, markers excluded.
    pub body: Vec<String>,

    /// Why the block closed.
    pub closure: Closure,

    /// 1-based line number of the start marker.
    pub opened_at: u64,

    /// 1-based line number of the end marker or fatal sentinel.
    pub closed_at: u64,

    /// Duration reported by an iMC end marker (`... 15 ms`).
    pub elapsed_ms: Option<u64>,
}

// =============================================================================
// Soft diagnostics
// =============================================================================

/// Bounded list of soft diagnostics for one session.
///
/// Once `MAX_DIAGNOSTICS` entries are held, further diagnostics are counted
/// but not stored.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<ExtractError>,
    suppressed: usize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and log it at debug level.
    pub fn push(&mut self, diagnostic: ExtractError) {
        tracing::debug!(diagnostic = %diagnostic, "Soft diagnostic");
        if self.items.len() < constants::MAX_DIAGNOSTICS {
            self.items.push(diagnostic);
        } else {
            self.suppressed += 1;
        }
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = ExtractError>) {
        for d in diagnostics {
            self.push(d);
        }
    }

    pub fn items(&self) -> &[ExtractError] {
        &self.items
    }

    /// Number of diagnostics dropped after the cap was reached.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Inventory
// =============================================================================

/// One installed memory module, as listed in the report inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    pub socket: String,
    pub channel: String,
    pub slot: String,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub size: Option<String>,
    #[serde(rename = "form factor")]
    pub form_factor: Option<String>,
    pub speed: Option<String>,
    pub timings: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn test_diagnostics_are_capped() {
        let mut d = Diagnostics::new();
        for i in 0..constants::MAX_DIAGNOSTICS + 5 {
            d.push(ExtractError::RowBeforeHeader {
                block: "T".to_string(),
                row: i,
            });
        }
        assert_eq!(d.len(), constants::MAX_DIAGNOSTICS);
        assert_eq!(d.suppressed(), 5);
    }
}
