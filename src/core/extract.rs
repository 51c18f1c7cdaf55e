// MrcSleuth - core/extract.rs
//
// Field extractors: turn the body of a closed block into store writes,
// fault events, or analyzer input.
//
// Extractors never fail. A row they cannot interpret becomes a soft
// diagnostic and the rest of the block is still processed.

use crate::core::collab::{FaultSignal, MarginAnalyzer};
use crate::core::model::{ClosedBlock, Diagnostics, FaultEvent, Severity};
use crate::core::registry::BlockKind;
use crate::core::store::{is_channel_key, MemoryRecord};
use crate::util::constants;
use crate::util::error::ExtractError;
use regex::Regex;
use std::sync::OnceLock;

/// Attribute written by each continuation row of a socket table, in order.
pub const DIMM_PARAMS: [&str; 9] = [
    "DIMM vendor",
    "DRAM vendor",
    "RCD vendor",
    "Organisation",
    "Form factor",
    "Freq",
    "Prod. week",
    "PN",
    "hex",
];

/// Companion attribute of `Freq`.
pub const TIMINGS: &str = "Timings";

/// Companion attribute holding the label of a `Label: value` cell.
pub const LABEL: &str = "Label";

/// Everything an extractor may touch, borrowed from the session for the
/// duration of one dispatch.
pub struct ExtractContext<'a> {
    pub store: &'a mut MemoryRecord,
    pub faults: &'a mut Vec<FaultEvent>,
    pub signal: &'a mut dyn FaultSignal,
    pub analyzer: Option<&'a mut dyn MarginAnalyzer>,
    pub diagnostics: &'a mut Diagnostics,
}

/// Run the extractor bound to the block's kind.
pub fn dispatch(block: &ClosedBlock, ctx: &mut ExtractContext<'_>) {
    tracing::debug!(
        block = %block.identity,
        kind = ?block.kind,
        lines = block.body.len(),
        "Dispatching block"
    );
    match block.kind {
        BlockKind::SocketTable => extract_socket_table(block, ctx.store, ctx.diagnostics),
        BlockKind::DimmInfoTable => extract_dimm_info(block, ctx.store, ctx.diagnostics),
        BlockKind::Training | BlockKind::MemTest | BlockKind::CorrectedError => {
            // Every event is signalled; only the stored list is capped.
            for event in scan_faults(block) {
                ctx.signal.signal(&event);
                if ctx.faults.len() >= constants::MAX_FAULT_EVENTS {
                    tracing::debug!(device = %event.device, "Fault event cap reached, event not stored");
                    continue;
                }
                ctx.faults.push(event);
            }
        }
        BlockKind::MarginResults => match ctx.analyzer.as_deref_mut() {
            Some(analyzer) => analyzer.ingest(block, ctx.store),
            None => ctx.diagnostics.push(ExtractError::NoAnalyzer {
                block: block.identity.clone(),
            }),
        },
    }
}

// =============================================================================
// Table helpers
// =============================================================================

/// Split a table row on `|`, trimming cells and dropping the empty cell left
/// by a closing delimiter.
fn split_row(line: &str) -> Vec<&str> {
    let mut cells: Vec<&str> = line.split('|').map(str::trim).collect();
    if cells.len() > 1 && cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

/// Rules drawn with `=`, `-` or `+`, and blank lines.
fn is_separator(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '=' | '-' | '+' | '|') || c.is_whitespace())
}

fn is_blank_cell(cell: &str) -> bool {
    cell.is_empty() || cell.eq_ignore_ascii_case("N/A")
}

fn rate_cell() -> &'static Regex {
    static RATE: OnceLock<Regex> = OnceLock::new();
    RATE.get_or_init(|| {
        Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s+(MT/s|MHz|GT/s)$").expect("rate cell regex")
    })
}

/// Decompose one cell into (attribute, value) writes.
///
/// `<number> <rate unit>` is always the frequency, with the unit as its
/// companion. In the `Freq` slot any two-token cell is split the same way.
/// `Label: value` keeps the value under the attribute and the label under
/// `LABEL`.
fn cell_writes(attribute: &str, cell: &str) -> Vec<(String, String)> {
    if let Some(caps) = rate_cell().captures(cell) {
        return vec![
            ("Freq".to_string(), caps[1].to_string()),
            (TIMINGS.to_string(), caps[2].to_string()),
        ];
    }
    if attribute == "Freq" {
        let tokens: Vec<&str> = cell.split_whitespace().collect();
        if let [freq, timings] = tokens.as_slice() {
            return vec![
                ("Freq".to_string(), freq.to_string()),
                (TIMINGS.to_string(), timings.to_string()),
            ];
        }
    }
    if let Some((label, value)) = cell.rsplit_once(':') {
        let value = value.trim();
        if !value.is_empty() {
            let mut writes = vec![(attribute.to_string(), value.to_string())];
            let label = label.trim();
            if !label.is_empty() {
                writes.push((LABEL.to_string(), label.to_string()));
            }
            return writes;
        }
    }
    vec![(attribute.to_string(), cell.to_string())]
}

// =============================================================================
// SOCKET_n_TABLE
// =============================================================================

/// Socket table: header `S | Ch0 | Ch1 | ...`, then one row group per DIMM
/// slot. The group's first row starts with the slot number; every row of the
/// group writes the next attribute of `DIMM_PARAMS` for each channel.
pub fn extract_socket_table(block: &ClosedBlock, store: &mut MemoryRecord, diags: &mut Diagnostics) {
    let Some(qualifier) = block.qualifier else {
        diags.push(ExtractError::MissingQualifier {
            block: block.identity.clone(),
        });
        return;
    };
    let socket = qualifier.to_string();

    let mut header: Option<Vec<String>> = None;
    let mut device: Option<String> = None;
    let mut param = 0usize;

    for (row_no, line) in block.body.iter().enumerate() {
        let row_no = row_no + 1;
        if is_separator(line) {
            continue;
        }
        let cells = split_row(line);
        if cells[0] == "S" {
            header = Some(cells[1..].iter().map(|c| c.to_string()).collect());
            continue;
        }
        let Some(columns) = header.as_ref() else {
            if line.contains('|') {
                diags.push(ExtractError::RowBeforeHeader {
                    block: block.identity.clone(),
                    row: row_no,
                });
            }
            continue;
        };

        if !cells[0].is_empty() {
            if cells[0].chars().all(|c| c.is_ascii_digit()) {
                device = Some(format!("Dimm {}", cells[0]));
                param = 0;
            } else {
                diags.push(ExtractError::MalformedRow {
                    block: block.identity.clone(),
                    row: row_no,
                    reason: format!("unexpected leading cell '{}'", cells[0]),
                });
                continue;
            }
        }
        let Some(dimm) = device.as_deref() else {
            diags.push(ExtractError::MalformedRow {
                block: block.identity.clone(),
                row: row_no,
                reason: "continuation row before any DIMM row".to_string(),
            });
            continue;
        };

        let values = &cells[1..];
        if values.len() > columns.len() {
            diags.push(ExtractError::CellOutsideHeader {
                block: block.identity.clone(),
                row: row_no,
                column: columns.len() + 1,
            });
        }
        if let Some(attribute) = DIMM_PARAMS.get(param) {
            for (channel, cell) in columns.iter().zip(values.iter()) {
                if is_blank_cell(cell) {
                    continue;
                }
                let node = store.socket_mut(&socket).channel_mut(channel).device_mut(dimm);
                for (name, value) in cell_writes(attribute, cell) {
                    node.set(name, value);
                }
            }
        }
        param += 1;
    }

    if header.is_none() {
        tracing::warn!(block = %block.identity, "Socket table without header row");
    }
}

// =============================================================================
// DIMMINFO_TABLE
// =============================================================================

/// DIMM info table: header cells name sockets, `ChN <param>` rows write
/// channel attributes, other rows (including `Chipkill Mode`, whose first
/// token only looks like a channel) write socket attributes. The last data
/// row is a footer and is not stored.
pub fn extract_dimm_info(block: &ClosedBlock, store: &mut MemoryRecord, diags: &mut Diagnostics) {
    let rows: Vec<(usize, Vec<&str>)> = block
        .body
        .iter()
        .enumerate()
        .filter(|(_, l)| !is_separator(l))
        .map(|(i, l)| (i + 1, split_row(l)))
        .collect();

    let Some(((_, header), data)) = rows.split_first() else {
        tracing::warn!(block = %block.identity, "DIMM info table is empty");
        return;
    };
    let sockets = &header[1..];
    let data = match data.split_last() {
        Some((_, body)) => body,
        None => return,
    };

    for (row_no, cells) in data {
        let label = cells[0];
        if label.is_empty() {
            diags.push(ExtractError::MalformedRow {
                block: block.identity.clone(),
                row: *row_no,
                reason: "row has no label".to_string(),
            });
            continue;
        }
        let values = &cells[1..];
        if values.len() > sockets.len() {
            diags.push(ExtractError::CellOutsideHeader {
                block: block.identity.clone(),
                row: *row_no,
                column: sockets.len() + 1,
            });
        }
        let channel_param = label
            .split_once(char::is_whitespace)
            .filter(|(ch, _)| is_channel_key(ch))
            .map(|(ch, param)| (ch, param.trim()));

        for (socket, value) in sockets.iter().zip(values.iter()) {
            if is_blank_cell(value) {
                continue;
            }
            let node = store.socket_mut(socket);
            match channel_param {
                Some((channel, param)) => {
                    node.channel_mut(channel).attributes.insert(param.to_string(), value.to_string());
                }
                None => {
                    node.attributes.insert(label.to_string(), value.to_string());
                }
            }
        }
    }
}

// =============================================================================
// Pattern scan
// =============================================================================

struct FaultPatterns {
    mem_test: Regex,
    training: Regex,
    corrected: Regex,
}

fn fault_patterns() -> &'static FaultPatterns {
    static PATTERNS: OnceLock<FaultPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        fn re(pat: &str) -> Regex {
            Regex::new(pat).expect("fault pattern: invalid regex")
        }
        FaultPatterns {
            mem_test: re(r"(N[0-9]\.C[0-6]\.D[0-3]\.R[0-9]): MemTest Failure!"),
            training: re(r"(N[0-9]\.C[0-6]\.D[0-3]\.R[0-9])\.S[01][0-9]: Failed RdDqDqs"),
            corrected: re(
                r"Last Err Info Node=([0-9]+) ddrch=([0-9]+) dimm=([0-9]+) rank=([0-9]+)",
            ),
        }
    })
}

/// Scan a pattern-scan block for fault signatures. One event per matching
/// line; lines that match nothing are skipped.
pub fn scan_faults(block: &ClosedBlock) -> Vec<FaultEvent> {
    let Some(severity) = block.kind.fault_severity() else {
        return Vec::new();
    };
    let p = fault_patterns();
    block
        .body
        .iter()
        .filter_map(|line| {
            let device = match block.kind {
                BlockKind::MemTest => p.mem_test.captures(line).map(|c| c[1].to_string()),
                BlockKind::Training => p.training.captures(line).map(|c| c[1].to_string()),
                BlockKind::CorrectedError => p
                    .corrected
                    .captures(line)
                    .map(|c| format!("N{}.C{}.D{}.R{}", &c[1], &c[2], &c[3], &c[4])),
                _ => None,
            }?;
            Some(fault(device, severity, &block.identity))
        })
        .collect()
}

fn fault(device: String, severity: Severity, block: &str) -> FaultEvent {
    tracing::debug!(device = %device, severity = %severity, block, "Fault signature matched");
    FaultEvent {
        device,
        severity,
        block: block.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collab::LogOnlySignal;
    use crate::core::model::Closure;

    fn block(identity: &str, kind: BlockKind, body: &[&str]) -> ClosedBlock {
        ClosedBlock {
            identity: identity.to_string(),
            kind,
            qualifier: crate::core::registry::qualifier_of(identity),
            body: body.iter().map(|s| s.to_string()).collect(),
            closure: Closure::EndMarker,
            opened_at: 1,
            closed_at: body.len() as u64 + 2,
            elapsed_ms: None,
        }
    }

    #[test]
    fn test_socket_table_rate_cells() {
        let b = block(
            "SOCKET_0_TABLE",
            BlockKind::SocketTable,
            &["S | Ch0 | Ch1", "0 | 2666 MT/s | 2400 MT/s"],
        );
        let mut store = MemoryRecord::new();
        let mut diags = Diagnostics::new();
        extract_socket_table(&b, &mut store, &mut diags);

        let s = store.socket("Socket 0");
        assert_eq!(s.channel("Ch0").device("Dimm 0").get("Freq"), Some("2666"));
        assert_eq!(s.channel("Ch0").device("Dimm 0").get(TIMINGS), Some("MT/s"));
        assert_eq!(s.channel("Ch1").device("Dimm 0").get("Freq"), Some("2400"));
        assert_eq!(s.channel("Ch1").device("Dimm 0").get(TIMINGS), Some("MT/s"));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_socket_table_param_schedule() {
        let b = block(
            "SOCKET_1_TABLE",
            BlockKind::SocketTable,
            &[
                "BDX-EP banner",
                "==========================",
                "S | Ch0 | Ch1 |",
                "--------------------------",
                "0 | Samsung | Not installed |",
                "  | Samsung | N/A |",
                "  | IDT | |",
                "  | 16GB 2Rx4 | |",
                "  | RDIMM | |",
                "  | 2666 19-19-19 | |",
                "  | Week: 1823 | |",
                "  | M393A2K43BB1-CTD | |",
                "  | 0xDEAD | |",
                "  | extra row | |",
                "1 | Not installed | Not installed |",
            ],
        );
        let mut store = MemoryRecord::new();
        let mut diags = Diagnostics::new();
        extract_socket_table(&b, &mut store, &mut diags);

        let d = store.socket("1").channel("Channel 0").device("Dimm 0");
        assert_eq!(d.get("DIMM vendor"), Some("Samsung"));
        assert_eq!(d.get("RCD vendor"), Some("IDT"));
        assert_eq!(d.get("Organisation"), Some("16GB 2Rx4"));
        assert_eq!(d.get("Freq"), Some("2666"));
        assert_eq!(d.get(TIMINGS), Some("19-19-19"));
        assert_eq!(d.get("Prod. week"), Some("1823"));
        assert_eq!(d.get(LABEL), Some("Week"));
        assert_eq!(d.get("PN"), Some("M393A2K43BB1-CTD"));
        assert_eq!(d.get("hex"), Some("0xDEAD"));
        assert_eq!(d.attributes.len(), 11);

        let other = store.socket("1").channel("Ch1").device("Dimm 0");
        assert_eq!(other.get("DIMM vendor"), Some("Not installed"));
        assert_eq!(other.get("DRAM vendor"), None);
        assert!(diags.is_empty());
        assert_eq!(store.counts().dimms, 1);
    }

    #[test]
    fn test_socket_table_without_qualifier() {
        let b = block("SOCKET_TABLE", BlockKind::SocketTable, &["S | Ch0", "0 | x"]);
        let mut store = MemoryRecord::new();
        let mut diags = Diagnostics::new();
        extract_socket_table(&b, &mut store, &mut diags);
        assert!(store.is_empty());
        assert!(matches!(diags.items()[0], ExtractError::MissingQualifier { .. }));
    }

    #[test]
    fn test_socket_table_row_diagnostics() {
        let b = block(
            "SOCKET_0_TABLE",
            BlockKind::SocketTable,
            &["0 | early", "S | Ch0", " | orphan", "0 | A | B"],
        );
        let mut store = MemoryRecord::new();
        let mut diags = Diagnostics::new();
        extract_socket_table(&b, &mut store, &mut diags);
        let kinds: Vec<_> = diags.items().to_vec();
        assert!(matches!(kinds[0], ExtractError::RowBeforeHeader { row: 1, .. }));
        assert!(matches!(kinds[1], ExtractError::MalformedRow { row: 3, .. }));
        assert!(matches!(kinds[2], ExtractError::CellOutsideHeader { row: 4, column: 2, .. }));
        assert_eq!(
            store.socket("0").channel("Ch0").device("Dimm 0").get("DIMM vendor"),
            Some("A")
        );
    }

    #[test]
    fn test_dimm_info_channel_and_socket_rows() {
        let b = block(
            "DIMMINFO_TABLE",
            BlockKind::DimmInfoTable,
            &[
                "==========================",
                "          | Socket 0 | Socket 1 |",
                "==========================",
                "CPU       | SKX      | SKX      |",
                "Ch0 Freq  | 2666     | N/A      |",
                "Ch1 Volt  | 1.2V     | 1.2V     |",
                "footer    | ignored  | ignored  |",
            ],
        );
        let mut store = MemoryRecord::new();
        let mut diags = Diagnostics::new();
        extract_dimm_info(&b, &mut store, &mut diags);

        assert_eq!(store.socket("0").attributes.get("CPU").map(String::as_str), Some("SKX"));
        assert_eq!(
            store.socket("Socket 0").channel("Channel 0").attributes.get("Freq").map(String::as_str),
            Some("2666")
        );
        assert!(store.socket("1").channel("Ch0").attributes.is_empty());
        assert_eq!(
            store.socket("1").channel("CH1").attributes.get("Volt").map(String::as_str),
            Some("1.2V")
        );
        assert!(store.socket("0").attributes.get("footer").is_none());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_dimm_info_extra_rows_keep_complete_record_complete() {
        let node = crate::core::model::NodeConfig {
            sockets_count: 1,
            channels_count: 1,
            dimms_count: 1,
            dimm_per_channel: 1,
            ..Default::default()
        };
        let mut store = MemoryRecord::new();
        store
            .socket_mut("0")
            .channel_mut("Ch0")
            .device_mut("Dimm 0")
            .set("DIMM vendor", "Samsung");
        assert!(store.completeness(&node).complete);

        let b = block(
            "DIMMINFO_TABLE",
            BlockKind::DimmInfoTable,
            &[
                "              | Socket 0 | Total |",
                "Ch0 Freq      | 2666     | 2666  |",
                "Chipkill Mode | Enabled  | -     |",
                "Checksum OK   | Yes      | -     |",
                "footer        | -        | -     |",
            ],
        );
        let mut diags = Diagnostics::new();
        extract_dimm_info(&b, &mut store, &mut diags);

        assert_eq!(
            store.socket("0").attributes.get("Chipkill Mode").map(String::as_str),
            Some("Enabled")
        );
        assert!(store.socket("0").channels.keys().all(|k| k.starts_with("Channel")));
        let c = store.completeness(&node);
        assert!(c.complete, "{}", c.describe());
        assert_eq!(c.observed.channels.get("Socket 0"), Some(&1));
    }

    #[test]
    fn test_mem_test_failure_is_warning() {
        let b = block("MemTest", BlockKind::MemTest, &["N0.C2.D1.R0: MemTest Failure!", "noise"]);
        let events = scan_faults(&b);
        assert_eq!(
            events,
            vec![FaultEvent {
                device: "N0.C2.D1.R0".to_string(),
                severity: Severity::Warning,
                block: "MemTest".to_string(),
            }]
        );
    }

    #[test]
    fn test_training_and_corrected_error_signatures() {
        let t = block(
            "Rx Dq/Dqs Basic",
            BlockKind::Training,
            &["N1.C3.D0.R1.S07: Failed RdDqDqs"],
        );
        let e = scan_faults(&t);
        assert_eq!(e[0].device, "N1.C3.D0.R1");
        assert_eq!(e[0].severity, Severity::Critical);

        let c = block(
            "Corrected Memory Error",
            BlockKind::CorrectedError,
            &["Last Err Info Node=0 ddrch=2 dimm=1 rank=3"],
        );
        assert_eq!(scan_faults(&c)[0].device, "N0.C2.D1.R3");
    }

    #[test]
    fn test_dispatch_forwards_faults_to_signal() {
        struct Recorder(Vec<String>);
        impl FaultSignal for Recorder {
            fn signal(&mut self, event: &FaultEvent) {
                self.0.push(event.device.clone());
            }
        }

        let b = block("MemTest", BlockKind::MemTest, &["N9.C6.D3.R9: MemTest Failure!"]);
        let mut store = MemoryRecord::new();
        let mut faults = Vec::new();
        let mut rec = Recorder(Vec::new());
        let mut diags = Diagnostics::new();
        let mut ctx = ExtractContext {
            store: &mut store,
            faults: &mut faults,
            signal: &mut rec,
            analyzer: None,
            diagnostics: &mut diags,
        };
        dispatch(&b, &mut ctx);
        assert_eq!(faults.len(), 1);
        assert_eq!(rec.0, vec!["N9.C6.D3.R9"]);
    }

    #[test]
    fn test_faults_past_the_cap_are_still_signalled() {
        struct Counter(usize);
        impl FaultSignal for Counter {
            fn signal(&mut self, _event: &FaultEvent) {
                self.0 += 1;
            }
        }

        let b = block(
            "MemTest",
            BlockKind::MemTest,
            &["N0.C0.D0.R0: MemTest Failure!", "N0.C1.D0.R1: MemTest Failure!"],
        );
        let stored = FaultEvent {
            device: "N1.C0.D0.R0".to_string(),
            severity: Severity::Warning,
            block: "MemTest".to_string(),
        };
        let mut store = MemoryRecord::new();
        let mut faults = vec![stored; constants::MAX_FAULT_EVENTS - 1];
        let mut counter = Counter(0);
        let mut diags = Diagnostics::new();
        let mut ctx = ExtractContext {
            store: &mut store,
            faults: &mut faults,
            signal: &mut counter,
            analyzer: None,
            diagnostics: &mut diags,
        };
        dispatch(&b, &mut ctx);
        assert_eq!(counter.0, 2);
        assert_eq!(faults.len(), constants::MAX_FAULT_EVENTS);
        assert_eq!(faults.last().map(|f| f.device.as_str()), Some("N0.C0.D0.R0"));
    }

    #[test]
    fn test_margin_block_without_analyzer_is_diagnosed() {
        let b = block("BSSA_RMT", BlockKind::MarginResults, &["RMT data"]);
        let mut store = MemoryRecord::new();
        let mut faults = Vec::new();
        let mut signal = LogOnlySignal;
        let mut diags = Diagnostics::new();
        let mut ctx = ExtractContext {
            store: &mut store,
            faults: &mut faults,
            signal: &mut signal,
            analyzer: None,
            diagnostics: &mut diags,
        };
        dispatch(&b, &mut ctx);
        assert!(matches!(diags.items()[0], ExtractError::NoAnalyzer { .. }));
    }
}
