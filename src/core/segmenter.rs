// MrcSleuth - core/segmenter.rs
//
// Incremental block segmentation of a console stream.
//
// Lines are fed one at a time. Start markers push a frame, the matching end
// marker (or a fatal sentinel) pops it and hands the closed block back to
// the caller. Each frame owns its own body buffer, so a nested block never
// leaks its lines into the enclosing one.

use crate::core::model::{ClosedBlock, Closure};
use crate::core::registry::{self, BlockKind, HandlerRegistry, MarkerFamily, StartMarker};
use crate::util::constants;
use crate::util::error::ExtractError;
use crate::util::logging::preview;

/// Segmentation limits.
#[derive(Debug, Clone, Copy)]
pub struct SegmentLimits {
    pub max_block_lines: usize,
    pub max_nesting_depth: usize,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            max_block_lines: constants::DEFAULT_MAX_BLOCK_BODY_LINES,
            max_nesting_depth: constants::DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

/// An open block awaiting its end marker.
#[derive(Debug)]
struct Frame {
    identity: String,
    kind: BlockKind,
    family: MarkerFamily,
    body: Vec<String>,
    opened_at: u64,
    overflowed: bool,
}

impl Frame {
    fn close(self, closure: Closure, closed_at: u64, elapsed_ms: Option<u64>) -> ClosedBlock {
        ClosedBlock {
            qualifier: registry::qualifier_of(&self.identity),
            identity: self.identity,
            kind: self.kind,
            body: self.body,
            closure,
            opened_at: self.opened_at,
            closed_at,
            elapsed_ms,
        }
    }
}

/// Stack-based block segmenter.
#[derive(Debug)]
pub struct Segmenter {
    registry: HandlerRegistry,
    limits: SegmentLimits,
    stack: Vec<Frame>,
    line_no: u64,
    diagnostics: Vec<ExtractError>,
}

impl Segmenter {
    pub fn new(registry: HandlerRegistry, limits: SegmentLimits) -> Self {
        Self {
            registry,
            limits,
            stack: Vec::new(),
            line_no: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Feed one raw console line. Returns the block closed by this line, if
    /// any. At most one block closes per line.
    pub fn feed(&mut self, raw: &str) -> Option<ClosedBlock> {
        self.line_no += 1;
        let line = registry::clean_line(raw);

        // Start markers are consumed whether or not the identity is bound,
        // so an unbound marker never lands in an enclosing body.
        if let Some(start) = self.registry.resolve_start(&line) {
            self.open(start);
            return None;
        }

        let top = self.stack.last_mut()?;

        if registry::is_fatal(&line) {
            tracing::warn!(
                block = %top.identity,
                line = self.line_no,
                text = preview(&line),
                "Fatal error sentinel closed block"
            );
            let frame = self.stack.pop()?;
            return Some(frame.close(Closure::FatalMarker, self.line_no, None));
        }

        if let Some((identity, elapsed_ms)) = registry::match_end(top.family, &line) {
            if identity == top.identity {
                let frame = self.stack.pop()?;
                tracing::debug!(
                    block = %frame.identity,
                    lines = frame.body.len(),
                    opened_at = frame.opened_at,
                    closed_at = self.line_no,
                    "Block closed"
                );
                return Some(frame.close(Closure::EndMarker, self.line_no, elapsed_ms));
            }
        }

        if top.body.len() < self.limits.max_block_lines {
            top.body.push(line.into_owned());
        } else if !top.overflowed {
            top.overflowed = true;
            self.diagnostics.push(ExtractError::BodyOverflow {
                block: top.identity.clone(),
                max_lines: self.limits.max_block_lines,
            });
        }
        None
    }

    fn open(&mut self, start: StartMarker) {
        let StartMarker {
            family,
            identity,
            kind,
        } = start;
        let Some(kind) = kind else {
            tracing::trace!(block = %identity, line = self.line_no, "Unbound block ignored");
            return;
        };
        if self.stack.len() >= self.limits.max_nesting_depth {
            self.diagnostics.push(ExtractError::NestingTooDeep {
                block: identity,
                max_depth: self.limits.max_nesting_depth,
            });
            return;
        }
        tracing::debug!(block = %identity, ?kind, line = self.line_no, "Block opened");
        self.stack.push(Frame {
            identity,
            kind,
            family,
            body: Vec::new(),
            opened_at: self.line_no,
            overflowed: false,
        });
    }

    /// Take the diagnostics raised since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<ExtractError> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Identities of blocks still open, outermost first.
    pub fn open_blocks(&self) -> Vec<String> {
        self.stack.iter().map(|f| f.identity.clone()).collect()
    }

    /// Number of lines fed so far.
    pub fn lines_seen(&self) -> u64 {
        self.line_no
    }
}
