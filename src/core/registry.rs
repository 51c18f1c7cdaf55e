// MrcSleuth - core/registry.rs
//
// Block marker grammar and the identity -> extractor registry.
//
// The marker families are fixed by what MRC prints; the bindings from block
// identity to extractor kind are data and may be extended by embedders
// before a session starts.

use crate::core::model::Severity;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

// =============================================================================
// Extractor kinds
// =============================================================================

/// The closed set of extractors a block identity can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    /// `DIMMINFO_TABLE`: socket columns, channel-prefixed rows.
    DimmInfoTable,
    /// `SOCKET_n_TABLE`: channel columns, one device per `Dimm` row group.
    SocketTable,
    /// Rank training steps; failed ranks are critical.
    Training,
    /// Memory test; failures are warnings.
    MemTest,
    /// Runtime corrected error handler; every hit is critical.
    CorrectedError,
    /// Rank margin tool output, forwarded to the margin analyzer.
    MarginResults,
}

impl BlockKind {
    /// Goal satisfied once enough blocks of this kind have been extracted.
    pub fn completion_goal(self) -> &'static str {
        match self {
            BlockKind::DimmInfoTable => "dimm_info",
            BlockKind::SocketTable => "socket_info",
            BlockKind::Training => "training",
            BlockKind::MemTest => "mem_test",
            BlockKind::CorrectedError => "corrected_errors",
            BlockKind::MarginResults => "margin_results",
        }
    }

    /// True for kinds printed once per socket. Their completion goal needs a
    /// block for every expected socket.
    pub fn is_per_socket(self) -> bool {
        matches!(self, BlockKind::SocketTable)
    }

    /// Severity of fault signatures for pattern-scan kinds, `None` otherwise.
    pub fn fault_severity(self) -> Option<Severity> {
        match self {
            BlockKind::Training | BlockKind::CorrectedError => Some(Severity::Critical),
            BlockKind::MemTest => Some(Severity::Warning),
            _ => None,
        }
    }
}

// =============================================================================
// Marker grammar
// =============================================================================

/// Which start/end marker pair opened a frame. The end marker is only
/// checked against the family that opened the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerFamily {
    /// `START_X` / `STOP_X` printed by the BIOS.
    BaseBlock,
    /// `X -- Started` / `X - 15 ms` printed around iMC functions.
    ImcFunction,
    /// `X Hander start!` / `X Hander end!` printed by SMM handlers.
    SmmHandler,
}

struct Family {
    family: MarkerFamily,
    start: Regex,
    end: Regex,
}

struct Grammar {
    families: Vec<Family>,
    fatal: Regex,
    ansi: Regex,
}

fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();

    GRAMMAR.get_or_init(|| {
        // Patterns are constant and covered by the tests below.
        fn re(pat: &str) -> Regex {
            Regex::new(pat).expect("marker grammar: invalid regex")
        }

        Grammar {
            families: vec![
                Family {
                    family: MarkerFamily::BaseBlock,
                    start: re(r"^START_([0-9A-Z_]+)"),
                    end: re(r"^STOP_([0-9A-Z_]+)"),
                },
                Family {
                    family: MarkerFamily::ImcFunction,
                    start: re(r"^([A-Z].*) -- Started"),
                    end: re(r"^([A-Z].*) -?=? ([0-9]+) ?ms"),
                },
                Family {
                    family: MarkerFamily::SmmHandler,
                    start: re(r"^(.*) Hander start!"),
                    end: re(r"^(.*) Hander end!"),
                },
            ],
            fatal: re(r"Major Code = [0-9]+, Minor Code = [0-9]+"),
            ansi: re(r"\x1B\[[0-?]*[ -/]*[@-~]"),
        }
    })
}

/// Strip terminal escape sequences and line terminators from a raw line.
///
/// Borrows when there is nothing to strip, which is the common case.
pub fn clean_line(raw: &str) -> Cow<'_, str> {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if !trimmed.contains('\x1B') {
        return Cow::Borrowed(trimmed);
    }
    match grammar().ansi.replace_all(trimmed, "") {
        Cow::Borrowed(_) => Cow::Borrowed(trimmed),
        Cow::Owned(s) => Cow::Owned(s),
    }
}

/// Every start marker family matching `line`, in grammar order, with the
/// identity each one captures.
pub fn match_starts(line: &str) -> Vec<(MarkerFamily, String)> {
    grammar()
        .families
        .iter()
        .filter_map(|f| {
            f.start
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| (f.family, m.as_str().trim().to_string()))
        })
        .collect()
}

/// A start marker resolved against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartMarker {
    pub family: MarkerFamily,
    pub identity: String,
    /// `None` when no matching family captured a bound identity.
    pub kind: Option<BlockKind>,
}

/// Match the end marker of `family`. Returns the captured identity and the
/// elapsed milliseconds when the marker carries them.
pub fn match_end(family: MarkerFamily, line: &str) -> Option<(String, Option<u64>)> {
    let f = grammar().families.iter().find(|f| f.family == family)?;
    let caps = f.end.captures(line)?;
    let identity = caps.get(1)?.as_str().trim().to_string();
    let elapsed = caps.get(2).and_then(|m| m.as_str().parse().ok());
    Some((identity, elapsed))
}

/// True when the line carries the fatal-error sentinel.
pub fn is_fatal(line: &str) -> bool {
    grammar().fatal.is_match(line)
}

/// Socket number encoded in a block identity: all of its digits in order.
pub fn qualifier_of(identity: &str) -> Option<u32> {
    let digits: String = identity.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// =============================================================================
// Handler registry
// =============================================================================

/// Maps block identities to extractor kinds.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    bindings: HashMap<String, BlockKind>,
}

impl HandlerRegistry {
    /// A registry with no bindings. Every block is ignored.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The bindings for the blocks MRC prints on a standard build.
    pub fn builtin() -> Self {
        let mut r = Self::empty();
        r.bind("DIMMINFO_TABLE", BlockKind::DimmInfoTable);
        r.bind("SOCKET_0_TABLE", BlockKind::SocketTable);
        r.bind("SOCKET_1_TABLE", BlockKind::SocketTable);
        r.bind("Rx Dq/Dqs Basic", BlockKind::Training);
        r.bind("MemTest", BlockKind::MemTest);
        r.bind("Corrected Memory Error", BlockKind::CorrectedError);
        r.bind("BSSA_RMT", BlockKind::MarginResults);
        r.bind("RMT_N0", BlockKind::MarginResults);
        r.bind("RMT_N1", BlockKind::MarginResults);
        r
    }

    /// Bind an identity to a kind, returning the previous binding if any.
    pub fn bind(&mut self, identity: impl Into<String>, kind: BlockKind) -> Option<BlockKind> {
        self.bindings.insert(identity.into(), kind)
    }

    pub fn lookup(&self, identity: &str) -> Option<BlockKind> {
        self.bindings.get(identity).copied()
    }

    /// Resolve a start marker line. Among the families that match, the first
    /// one whose identity is bound wins; failing that, the first match is
    /// returned unbound so the caller can still consume the line.
    pub fn resolve_start(&self, line: &str) -> Option<StartMarker> {
        let candidates = match_starts(line);
        let bound = candidates.iter().find_map(|(family, identity)| {
            self.lookup(identity).map(|kind| StartMarker {
                family: *family,
                identity: identity.clone(),
                kind: Some(kind),
            })
        });
        bound.or_else(|| {
            candidates.into_iter().next().map(|(family, identity)| StartMarker {
                family,
                identity,
                kind: None,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
