// MrcSleuth - app/session.rs
//
// One parsing session: owns the segmenter, the memory record, the goal plan
// and everything collected along the way, and threads them through each
// line in a fixed order:
//
//   clean -> boot markers -> segment -> (on close) extract -> quorum ->
//   resolver advance
//
// Nothing for line N+1 starts before all of that is done for line N, so
// replaying the same transcript always gives the same record and verdict.
// The session is consumed by `finish`, which runs the resolver flush pass
// and builds the report.

use crate::core::collab::{FaultSignal, LogOnlySignal, MarginAnalyzer};
use crate::core::extract::{self, ExtractContext};
use crate::core::markers::BootTracker;
use crate::core::model::{Closure, Diagnostics, FaultEvent, NodeConfig};
use crate::core::registry::{self, BlockKind, HandlerRegistry};
use crate::core::resolver::GoalPlan;
use crate::core::segmenter::{SegmentLimits, Segmenter};
use crate::core::store::MemoryRecord;
use crate::core::verdict::{self, Cause, TestReport, Truncation, VerdictInputs};
use crate::platform::config::AppConfig;
use crate::util::constants;
use crate::util::error::PlanError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::io;

/// Goal ids of the default testplan.
pub mod goals {
    pub const SOCKET_INFO: &str = "socket_info";
    pub const DIMM_INFO: &str = "dimm_info";
    pub const RAM_COMPLETENESS: &str = "ram_completeness";
    pub const MARGIN_RESULTS: &str = "margin_results";
    pub const MARGIN_COMPLETENESS: &str = "margin_completeness";
    pub const QUALIFICATION: &str = "qualification";
}

/// Knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Test name recorded in the report.
    pub name: String,
    pub node: NodeConfig,
    pub limits: SegmentLimits,
    pub max_flush_rounds: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_TEST_NAME.to_string(),
            node: NodeConfig::default(),
            limits: SegmentLimits::default(),
            max_flush_rounds: constants::DEFAULT_MAX_FLUSH_ROUNDS,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node: config.node,
            limits: SegmentLimits {
                max_block_lines: config.max_block_lines,
                max_nesting_depth: config.max_nesting_depth,
            },
            max_flush_rounds: config.max_flush_rounds,
        }
    }
}

/// State visible to goal actions.
pub struct SessionData {
    pub store: MemoryRecord,
    pub node: NodeConfig,
    pub analyzer: Option<Box<dyn MarginAnalyzer>>,
    pub faults: Vec<FaultEvent>,
    pub diagnostics: Diagnostics,
}

/// What a finished session leaves behind.
#[derive(Debug)]
pub struct SessionOutcome {
    pub report: TestReport,
    pub store: MemoryRecord,
}

/// Build the goal plan every session starts from.
fn default_testplan(registry: &HandlerRegistry) -> Result<GoalPlan<SessionData>, PlanError> {
    let mut plan = GoalPlan::new();
    plan.add_extraction(goals::SOCKET_INFO)?;
    plan.add_extraction(goals::DIMM_INFO)?;
    for kind in [BlockKind::Training, BlockKind::MemTest, BlockKind::CorrectedError] {
        plan.add_optional_extraction(kind.completion_goal())?;
    }
    plan.add_goal(
        goals::RAM_COMPLETENESS,
        [goals::SOCKET_INFO, goals::DIMM_INFO],
        |d: &mut SessionData| {
            let c = d.store.completeness(&d.node);
            if c.complete {
                tracing::info!(dimms = c.observed.dimms, "RAM configuration complete");
            } else {
                tracing::warn!(detail = %c.describe(), "RAM configuration incomplete");
            }
            c.complete
        },
    )?;
    tracing::debug!(goals = plan.len(), bindings = registry.len(), "Default testplan built");
    Ok(plan)
}

/// A single pass over one console transcript.
pub struct ParseSession {
    name: String,
    max_flush_rounds: usize,
    segmenter: Segmenter,
    plan: GoalPlan<SessionData>,
    data: SessionData,
    signal: Box<dyn FaultSignal>,
    boot: BootTracker,
    /// Qualifiers of the cleanly closed blocks seen per kind.
    quorum: HashMap<BlockKind, BTreeSet<Option<u32>>>,
    truncations: Vec<Truncation>,
    blocks_dispatched: u64,
    started_at: DateTime<Utc>,
}

impl ParseSession {
    pub fn new(registry: HandlerRegistry, options: SessionOptions) -> Result<Self, PlanError> {
        let plan = default_testplan(&registry)?;
        tracing::info!(
            name = %options.name,
            sockets = options.node.sockets_count,
            channels = options.node.channels_count,
            dimms = options.node.dimms_count,
            "Parse session started"
        );
        Ok(Self {
            name: options.name,
            max_flush_rounds: options.max_flush_rounds,
            segmenter: Segmenter::new(registry, options.limits),
            plan,
            data: SessionData {
                store: MemoryRecord::new(),
                node: options.node,
                analyzer: None,
                faults: Vec::new(),
                diagnostics: Diagnostics::new(),
            },
            signal: Box::new(LogOnlySignal),
            boot: BootTracker::new(),
            quorum: HashMap::new(),
            truncations: Vec::new(),
            blocks_dispatched: 0,
            started_at: Utc::now(),
        })
    }

    /// Route fault events to `signal` instead of the log.
    pub fn with_signal(mut self, signal: Box<dyn FaultSignal>) -> Self {
        self.signal = signal;
        self
    }

    /// Register a margin analyzer and the goals that depend on it.
    pub fn with_analyzer(mut self, analyzer: Box<dyn MarginAnalyzer>) -> Result<Self, PlanError> {
        self.data.analyzer = Some(analyzer);
        self.plan.add_extraction(goals::MARGIN_RESULTS)?;
        self.plan.add_goal(
            goals::MARGIN_COMPLETENESS,
            [goals::RAM_COMPLETENESS, goals::MARGIN_RESULTS],
            |d: &mut SessionData| match d.analyzer.as_mut() {
                Some(a) => a.result_completeness(&d.store),
                None => false,
            },
        )?;
        self.plan.add_goal(
            goals::QUALIFICATION,
            [goals::MARGIN_COMPLETENESS, goals::RAM_COMPLETENESS],
            |d: &mut SessionData| match d.analyzer.as_mut() {
                Some(a) => a.qualify(&d.store, &d.node),
                None => false,
            },
        )?;
        Ok(self)
    }

    /// The goal plan, for embedders adding their own goals before the run.
    pub fn plan_mut(&mut self) -> &mut GoalPlan<SessionData> {
        &mut self.plan
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Process one raw console line to completion.
    pub fn process_line(&mut self, raw: &str) {
        let line_no = self.segmenter.lines_seen() + 1;
        let line = registry::clean_line(raw);
        self.boot.observe(&line, line_no);

        let closed = self.segmenter.feed(&line);
        self.data.diagnostics.extend(self.segmenter.take_diagnostics());
        let Some(block) = closed else {
            return;
        };

        match block.closure {
            Closure::FatalMarker => self.truncations.push(Truncation {
                block: block.identity.clone(),
                line: block.closed_at,
            }),
            Closure::EndMarker => {
                let before = self.truncations.len();
                self.truncations.retain(|t| t.block != block.identity);
                if self.truncations.len() != before {
                    tracing::info!(block = %block.identity, "Truncated block completed on retry");
                }
            }
        }

        let mut ctx = ExtractContext {
            store: &mut self.data.store,
            faults: &mut self.data.faults,
            signal: self.signal.as_mut(),
            analyzer: self
                .data
                .analyzer
                .as_deref_mut()
                .map(|a| a as &mut dyn MarginAnalyzer),
            diagnostics: &mut self.data.diagnostics,
        };
        extract::dispatch(&block, &mut ctx);
        self.blocks_dispatched += 1;

        if block.closure == Closure::EndMarker {
            self.count_towards_quorum(block.kind, block.qualifier);
        }
        let ran = self.plan.advance(&mut self.data);
        if ran > 0 {
            tracing::debug!(goals = ran, line = line_no, "Resolver advanced");
        }
    }

    /// Report the kind's goal once enough clean blocks of it have been
    /// extracted: one per expected socket for per-socket kinds, one
    /// otherwise. Truncated blocks never count.
    fn count_towards_quorum(&mut self, kind: BlockKind, qualifier: Option<u32>) {
        let goal = kind.completion_goal();
        if !self.plan.contains(goal) {
            return;
        }
        let (seen, required) = if kind.is_per_socket() {
            let Some(q) = qualifier else { return };
            let seen = self.quorum.entry(kind).or_default();
            seen.insert(Some(q));
            (seen.len(), self.data.node.sockets_count)
        } else {
            let seen = self.quorum.entry(kind).or_default();
            seen.insert(qualifier);
            (seen.len(), 1)
        };
        if seen >= required {
            match self.plan.record_extraction(goal) {
                Ok(true) => tracing::info!(goal, "Extraction goal complete"),
                Ok(false) => {}
                Err(e) => tracing::warn!(goal, error = %e, "Extraction goal rejected"),
            }
        } else {
            tracing::debug!(goal, seen, required, "Extraction goal waiting for more blocks");
        }
    }

    /// True once every required goal is terminal and no block is open.
    /// A live console has no end-of-stream, so this is where it stops.
    pub fn is_settled(&self) -> bool {
        self.segmenter.open_blocks().is_empty() && self.plan.unresolved().is_empty()
    }

    /// Feed every line of `lines`, then finish. A read error ends the stream
    /// early; whatever was read so far is still evaluated.
    pub fn run<I>(mut self, lines: I) -> SessionOutcome
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        for line in lines {
            match line {
                Ok(l) => self.process_line(&l),
                Err(e) => {
                    tracing::warn!(error = %e, "Console stream interrupted");
                    break;
                }
            }
        }
        self.finish()
    }

    /// End of stream: flush the resolver and build the report.
    pub fn finish(mut self) -> SessionOutcome {
        let unterminated = self.segmenter.open_blocks();
        if !unterminated.is_empty() {
            tracing::warn!(blocks = ?unterminated, "Blocks still open at end of stream");
        }

        let flush = self.plan.flush(&mut self.data, self.max_flush_rounds);
        let completeness = self.data.store.completeness(&self.data.node);
        let failed = self.plan.failed();

        let verdict = verdict::aggregate(VerdictInputs {
            completeness: &completeness,
            unterminated: &unterminated,
            truncations: &self.truncations,
            failed_goals: &failed,
            unresolved_goals: &flush.unresolved,
        });

        let mut diagnostics: Vec<String> = self
            .data
            .diagnostics
            .items()
            .iter()
            .map(ToString::to_string)
            .collect();
        if self.data.diagnostics.suppressed() > 0 {
            diagnostics.push(format!(
                "{} further diagnostics suppressed",
                self.data.diagnostics.suppressed()
            ));
        }

        let report = TestReport {
            name: self.name,
            status: verdict.status,
            errors: verdict.errors.iter().map(Cause::message).collect(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            components: self.data.store.inventory(),
            faults: self.data.faults,
            diagnostics,
            boot: self.boot.into_progress(),
            goals: self.plan.outcomes(),
            lines_processed: self.segmenter.lines_seen(),
            blocks_dispatched: self.blocks_dispatched,
            verdict,
        };
        tracing::info!(
            status = ?report.status,
            lines = report.lines_processed,
            blocks = report.blocks_dispatched,
            faults = report.faults.len(),
            "Parse session finished"
        );
        SessionOutcome {
            report,
            store: self.data.store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ClosedBlock;
    use crate::core::resolver::GoalState;
    use crate::core::verdict::Status;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn small_node() -> NodeConfig {
        NodeConfig {
            sockets_count: 2,
            channels_count: 1,
            dimms_count: 2,
            dimm_per_channel: 1,
            por_ram_freq: 2666,
        }
    }

    fn session() -> ParseSession {
        let options = SessionOptions {
            node: small_node(),
            ..Default::default()
        };
        ParseSession::new(HandlerRegistry::builtin(), options).unwrap()
    }

    fn socket_table(socket: u32) -> Vec<String> {
        vec![
            format!("START_SOCKET_{socket}_TABLE"),
            "S | Ch0 |".to_string(),
            "0 | Samsung |".to_string(),
            "  | Samsung |".to_string(),
            format!("STOP_SOCKET_{socket}_TABLE"),
        ]
    }

    fn dimm_info() -> Vec<String> {
        [
            "START_DIMMINFO_TABLE",
            "     | Socket 0 | Socket 1 |",
            "Ch0 Freq | 2666 | 2666 |",
            "footer | - | - |",
            "STOP_DIMMINFO_TABLE",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn feed(s: &mut ParseSession, lines: &[String]) {
        for l in lines {
            s.process_line(l);
        }
    }

    #[test]
    fn test_per_socket_quorum_waits_for_every_socket() {
        let mut s = session();
        feed(&mut s, &socket_table(0));
        assert_eq!(s.plan.state(goals::SOCKET_INFO), Some(GoalState::Pending));
        feed(&mut s, &socket_table(0));
        assert_eq!(s.plan.state(goals::SOCKET_INFO), Some(GoalState::Pending));
        feed(&mut s, &socket_table(1));
        assert_eq!(s.plan.state(goals::SOCKET_INFO), Some(GoalState::Succeeded));
    }

    #[test]
    fn test_complete_transcript_passes() {
        let mut s = session();
        feed(&mut s, &socket_table(0));
        feed(&mut s, &socket_table(1));
        feed(&mut s, &dimm_info());
        assert_eq!(
            s.plan.state(goals::RAM_COMPLETENESS),
            Some(GoalState::Succeeded)
        );
        assert!(s.is_settled());
        let out = s.finish();
        assert_eq!(out.report.status, Status::Passed, "{:?}", out.report.errors);
        assert_eq!(out.report.components.len(), 2);
        assert_eq!(out.report.blocks_dispatched, 3);
    }

    #[test]
    fn test_truncated_block_recovers_when_reprinted() {
        let mut s = session();
        feed(
            &mut s,
            &[
                "START_SOCKET_0_TABLE".to_string(),
                "S | Ch0 |".to_string(),
                "Major Code = 1, Minor Code = 2".to_string(),
            ],
        );
        assert_eq!(s.truncations.len(), 1);
        assert_eq!(s.plan.state(goals::SOCKET_INFO), Some(GoalState::Pending));
        feed(&mut s, &socket_table(0));
        assert!(s.truncations.is_empty());
    }

    #[test]
    fn test_fatal_at_end_of_stream_fails_run() {
        let mut s = session();
        feed(&mut s, &socket_table(0));
        feed(
            &mut s,
            &[
                "START_SOCKET_1_TABLE".to_string(),
                "S | Ch0 |".to_string(),
                "0 | Hynix |".to_string(),
                "Major Code = 1, Minor Code = 2".to_string(),
            ],
        );
        let out = s.finish();
        assert_eq!(out.report.status, Status::Failed);
        assert!(out
            .report
            .verdict
            .errors
            .iter()
            .any(|e| matches!(e, Cause::FatalTruncation { block, .. } if block == "SOCKET_1_TABLE")));
        // The partial body was still extracted.
        assert_eq!(
            out.store.socket("1").channel("Ch0").device("Dimm 0").get("DIMM vendor"),
            Some("Hynix")
        );
    }

    struct MockAnalyzer {
        ingested: Rc<RefCell<Vec<String>>>,
        qualifies: bool,
    }

    impl MarginAnalyzer for MockAnalyzer {
        fn ingest(&mut self, block: &ClosedBlock, _store: &MemoryRecord) {
            self.ingested.borrow_mut().push(block.identity.clone());
        }
        fn result_completeness(&mut self, _store: &MemoryRecord) -> bool {
            !self.ingested.borrow().is_empty()
        }
        fn qualify(&mut self, _store: &MemoryRecord, _node: &NodeConfig) -> bool {
            self.qualifies
        }
    }

    #[test]
    fn test_analyzer_goals_run_after_completeness() {
        let ingested = Rc::new(RefCell::new(Vec::new()));
        let mut s = session()
            .with_analyzer(Box::new(MockAnalyzer {
                ingested: Rc::clone(&ingested),
                qualifies: false,
            }))
            .unwrap();

        feed(
            &mut s,
            &["START_BSSA_RMT".to_string(), "margins".to_string(), "STOP_BSSA_RMT".to_string()],
        );
        assert_eq!(*ingested.borrow(), vec!["BSSA_RMT"]);
        assert_eq!(s.plan.state(goals::QUALIFICATION), Some(GoalState::Pending));

        feed(&mut s, &socket_table(0));
        feed(&mut s, &socket_table(1));
        feed(&mut s, &dimm_info());
        assert_eq!(
            s.plan.state(goals::MARGIN_COMPLETENESS),
            Some(GoalState::Succeeded)
        );
        assert_eq!(s.plan.state(goals::QUALIFICATION), Some(GoalState::Failed));

        let out = s.finish();
        assert_eq!(out.report.status, Status::Failed);
        assert_eq!(out.report.errors, vec!["goal 'qualification' failed"]);
    }

    #[test]
    fn test_missing_tables_leave_goals_unresolved() {
        let s = session();
        let out = s.finish();
        assert_eq!(out.report.status, Status::Failed);
        assert!(out.report.verdict.errors.iter().any(|e| matches!(
            e,
            Cause::UnresolvedGoals { goals } if goals.contains(&"ram_completeness".to_string())
        )));
        // Pattern-scan goals are optional.
        assert!(!out.report.errors.iter().any(|e| e.contains("mem_test")));
    }
}
