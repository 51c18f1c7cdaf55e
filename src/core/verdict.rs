// MrcSleuth - core/verdict.rs
//
// Result aggregation: store completeness, goal outcomes and truncations in,
// verdict out. Built once, after the stream has ended.

use crate::core::markers::BootProgress;
use crate::core::model::{Component, FaultEvent};
use crate::core::resolver::GoalOutcome;
use crate::core::store::Completeness;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Passed,
    Failed,
}

/// A block cut short by a fatal error sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub block: String,
    pub line: u64,
}

/// One reason a run failed.
///
/// Incomplete data is split in two. `IncompleteData` compares the store with
/// the node configuration; `UnterminatedBlocks` is the incomplete-data case
/// for blocks that never closed, whose bodies were not extracted. Either one
/// fails the run on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cause {
    /// The memory picture does not match the node configuration.
    IncompleteData {
        detail: String,
        completeness: Completeness,
    },
    /// Blocks were still open when the stream ended, so their data is
    /// missing even if the store looks complete.
    UnterminatedBlocks { blocks: Vec<String> },
    /// A fatal sentinel truncated a block and it never completed later.
    FatalTruncation { block: String, line: u64 },
    /// A goal's action reported failure.
    GoalFailed { goal: String },
    /// Goals that never reached a terminal state.
    UnresolvedGoals { goals: Vec<String> },
}

impl Cause {
    pub fn message(&self) -> String {
        match self {
            Cause::IncompleteData { detail, .. } => format!("incomplete data: {detail}"),
            Cause::UnterminatedBlocks { blocks } => {
                format!(
                    "incomplete data: blocks still open at end of stream: {}",
                    blocks.join(", ")
                )
            }
            Cause::FatalTruncation { block, line } => {
                format!("'{block}' truncated by fatal error at line {line}")
            }
            Cause::GoalFailed { goal } => format!("goal '{goal}' failed"),
            Cause::UnresolvedGoals { goals } => {
                format!("unresolved goals: {}", goals.join(", "))
            }
        }
    }
}

/// Final status plus one descriptor per contributing cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: Status,
    pub errors: Vec<Cause>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

/// Everything the aggregator looks at.
#[derive(Debug, Clone, Copy)]
pub struct VerdictInputs<'a> {
    pub completeness: &'a Completeness,
    pub unterminated: &'a [String],
    pub truncations: &'a [Truncation],
    pub failed_goals: &'a [String],
    pub unresolved_goals: &'a [String],
}

/// Combine the end-of-run state into a verdict. Causes are listed in a
/// fixed order so identical inputs give identical verdicts.
pub fn aggregate(inputs: VerdictInputs<'_>) -> Verdict {
    let mut errors = Vec::new();

    if !inputs.completeness.complete {
        errors.push(Cause::IncompleteData {
            detail: inputs.completeness.describe(),
            completeness: inputs.completeness.clone(),
        });
    }
    if !inputs.unterminated.is_empty() {
        errors.push(Cause::UnterminatedBlocks {
            blocks: inputs.unterminated.to_vec(),
        });
    }
    for t in inputs.truncations {
        errors.push(Cause::FatalTruncation {
            block: t.block.clone(),
            line: t.line,
        });
    }
    for goal in inputs.failed_goals {
        errors.push(Cause::GoalFailed { goal: goal.clone() });
    }
    if !inputs.unresolved_goals.is_empty() {
        errors.push(Cause::UnresolvedGoals {
            goals: inputs.unresolved_goals.to_vec(),
        });
    }

    let status = if errors.is_empty() {
        Status::Passed
    } else {
        Status::Failed
    };
    for e in &errors {
        tracing::warn!(cause = %e.message(), "Verdict cause");
    }
    tracing::info!(?status, causes = errors.len(), "Verdict built");
    Verdict { status, errors }
}

/// The full record of one test run, as written to the report sink.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    pub status: Status,
    /// Human-readable cause messages.
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub components: Vec<Component>,
    pub faults: Vec<FaultEvent>,
    pub diagnostics: Vec<String>,
    pub boot: BootProgress,
    pub goals: Vec<GoalOutcome>,
    pub lines_processed: u64,
    pub blocks_dispatched: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::NodeConfig;
    use crate::core::store::MemoryRecord;

    fn complete() -> Completeness {
        let node = NodeConfig {
            sockets_count: 0,
            channels_count: 0,
            dimms_count: 0,
            ..Default::default()
        };
        MemoryRecord::new().completeness(&node)
    }

    #[test]
    fn test_clean_run_passes() {
        let c = complete();
        let v = aggregate(VerdictInputs {
            completeness: &c,
            unterminated: &[],
            truncations: &[],
            failed_goals: &[],
            unresolved_goals: &[],
        });
        assert!(v.passed());
        assert!(v.errors.is_empty());
    }

    #[test]
    fn test_each_cause_is_listed_in_order() {
        let c = MemoryRecord::new().completeness(&NodeConfig::default());
        let v = aggregate(VerdictInputs {
            completeness: &c,
            unterminated: &["MemTest".to_string()],
            truncations: &[Truncation {
                block: "SOCKET_0_TABLE".to_string(),
                line: 40,
            }],
            failed_goals: &["ram_completeness".to_string()],
            unresolved_goals: &["qualification".to_string()],
        });
        assert_eq!(v.status, Status::Failed);
        assert_eq!(v.errors.len(), 5);
        assert!(matches!(v.errors[0], Cause::IncompleteData { .. }));
        assert!(matches!(v.errors[1], Cause::UnterminatedBlocks { .. }));
        assert_eq!(
            v.errors[2].message(),
            "'SOCKET_0_TABLE' truncated by fatal error at line 40"
        );
        assert!(matches!(v.errors[3], Cause::GoalFailed { .. }));
        assert!(matches!(v.errors[4], Cause::UnresolvedGoals { .. }));
    }

    #[test]
    fn test_open_block_fails_an_otherwise_complete_run() {
        let c = complete();
        let v = aggregate(VerdictInputs {
            completeness: &c,
            unterminated: &["DIMMINFO_TABLE".to_string()],
            truncations: &[],
            failed_goals: &[],
            unresolved_goals: &[],
        });
        assert_eq!(v.status, Status::Failed);
        assert_eq!(v.errors.len(), 1);
        assert_eq!(
            v.errors[0].message(),
            "incomplete data: blocks still open at end of stream: DIMMINFO_TABLE"
        );
    }

    #[test]
    fn test_status_serialises_uppercase() {
        assert_eq!(serde_json::to_string(&Status::Passed).unwrap(), "\"PASSED\"");
    }
}
