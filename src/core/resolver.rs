// MrcSleuth - core/resolver.rs
//
// Goal graph scheduler ("testplan resolver").
//
// Goals are either fed by extraction (satisfied when enough blocks of a kind
// have been dispatched) or run an action over the session context once all
// of their prerequisites have succeeded. Every goal reaches a terminal state
// at most once; a failed goal is never retried.
//
// The graph is checked up front: goals on a dependency cycle, or depending
// on a goal that was never declared, are marked blocked and never run.

use crate::util::error::PlanError;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

/// Action run when a goal becomes ready. Returns true on success.
pub type GoalAction<C> = Box<dyn FnMut(&mut C) -> bool>;

/// Lifecycle of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalState {
    /// Not yet run (action goals) or not yet reported (extraction goals).
    Pending,
    Succeeded,
    Failed,
    /// On a dependency cycle or waiting on an undeclared goal.
    Blocked,
}

/// Final state of one goal, as listed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalOutcome {
    pub id: String,
    pub state: GoalState,
}

/// Result of the end-of-stream flush pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub executed: usize,
    pub rounds: usize,
    /// True when the round cap stopped the pass with goals still runnable.
    pub capped: bool,
    pub unresolved: Vec<String>,
}

enum Driver<C> {
    Action(GoalAction<C>),
    Extraction { optional: bool },
}

struct GoalEntry<C> {
    id: String,
    prerequisites: BTreeSet<String>,
    waiting_on: BTreeSet<String>,
    driver: Driver<C>,
    state: GoalState,
}

impl<C> GoalEntry<C> {
    fn is_ready(&self) -> bool {
        self.state == GoalState::Pending
            && matches!(self.driver, Driver::Action(_))
            && self.waiting_on.is_empty()
    }
}

/// The goal graph of one session, generic over the context the actions see.
pub struct GoalPlan<C> {
    goals: Vec<GoalEntry<C>>,
    index: HashMap<String, usize>,
    analysed: bool,
}

impl<C> Default for GoalPlan<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for GoalPlan<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.goals.iter().map(|g| (&g.id, g.state)))
            .finish()
    }
}

impl<C> GoalPlan<C> {
    pub fn new() -> Self {
        Self {
            goals: Vec::new(),
            index: HashMap::new(),
            analysed: false,
        }
    }

    fn insert(
        &mut self,
        id: String,
        prerequisites: BTreeSet<String>,
        driver: Driver<C>,
    ) -> Result<(), PlanError> {
        if self.index.contains_key(&id) {
            return Err(PlanError::DuplicateGoal { id });
        }
        tracing::debug!(goal = %id, ?prerequisites, "Goal declared");
        self.index.insert(id.clone(), self.goals.len());
        self.goals.push(GoalEntry {
            id,
            waiting_on: prerequisites.clone(),
            prerequisites,
            driver,
            state: GoalState::Pending,
        });
        self.analysed = false;
        Ok(())
    }

    /// Declare a goal that runs `action` once every prerequisite succeeded.
    pub fn add_goal<I, S>(
        &mut self,
        id: impl Into<String>,
        prerequisites: I,
        action: impl FnMut(&mut C) -> bool + 'static,
    ) -> Result<(), PlanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self.insert(id.into(), prerequisites, Driver::Action(Box::new(action)))
    }

    /// Declare a goal satisfied by `record_extraction`. Reported as
    /// unresolved if it never is.
    pub fn add_extraction(&mut self, id: impl Into<String>) -> Result<(), PlanError> {
        self.insert(id.into(), BTreeSet::new(), Driver::Extraction { optional: false })
    }

    /// Like `add_extraction`, but absence is not a failure.
    pub fn add_optional_extraction(&mut self, id: impl Into<String>) -> Result<(), PlanError> {
        self.insert(id.into(), BTreeSet::new(), Driver::Extraction { optional: true })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn state(&self, id: &str) -> Option<GoalState> {
        self.index.get(id).map(|&i| self.goals[i].state)
    }

    /// Report that the data behind an extraction goal is complete.
    ///
    /// Returns true the first time the goal succeeds, false if it was
    /// already terminal.
    pub fn record_extraction(&mut self, id: &str) -> Result<bool, PlanError> {
        let &i = self.index.get(id).ok_or_else(|| PlanError::UnknownGoal {
            id: id.to_string(),
        })?;
        if !matches!(self.goals[i].driver, Driver::Extraction { .. }) {
            tracing::warn!(goal = id, "Extraction reported for an action goal, ignored");
            return Ok(false);
        }
        if self.goals[i].state != GoalState::Pending {
            return Ok(false);
        }
        tracing::debug!(goal = id, "Extraction goal satisfied");
        self.succeed(i);
        Ok(true)
    }

    fn succeed(&mut self, i: usize) {
        self.goals[i].state = GoalState::Succeeded;
        let id = self.goals[i].id.clone();
        for g in &mut self.goals {
            g.waiting_on.remove(&id);
        }
    }

    /// Mark goals that can never run: those on a cycle, those waiting on an
    /// undeclared goal, and everything downstream of either.
    fn analyse(&mut self) {
        if self.analysed {
            return;
        }
        self.analysed = true;

        for g in &mut self.goals {
            if g.state == GoalState::Blocked {
                g.state = GoalState::Pending;
            }
        }

        let mut in_degree: Vec<usize> = Vec::with_capacity(self.goals.len());
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); self.goals.len()];
        let mut seeds: BTreeSet<usize> = BTreeSet::new();
        for (i, g) in self.goals.iter().enumerate() {
            let mut count = 0;
            for p in &g.prerequisites {
                match self.index.get(p) {
                    Some(&dep) => {
                        reverse[dep].push(i);
                        count += 1;
                    }
                    None => {
                        tracing::warn!(goal = %g.id, prerequisite = %p, "Goal depends on an undeclared goal");
                        seeds.insert(i);
                    }
                }
            }
            in_degree.push(count);
        }

        let mut queue: VecDeque<usize> = (0..self.goals.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut ordered = vec![false; self.goals.len()];
        while let Some(i) = queue.pop_front() {
            ordered[i] = true;
            for &dep in &reverse[i] {
                in_degree[dep] = in_degree[dep].saturating_sub(1);
                if in_degree[dep] == 0 {
                    queue.push_back(dep);
                }
            }
        }
        for (i, done) in ordered.iter().enumerate() {
            if !done {
                tracing::warn!(goal = %self.goals[i].id, "Goal is on a dependency cycle");
                seeds.insert(i);
            }
        }

        let mut stack: Vec<usize> = seeds.into_iter().collect();
        while let Some(i) = stack.pop() {
            if self.goals[i].state != GoalState::Pending {
                continue;
            }
            self.goals[i].state = GoalState::Blocked;
            stack.extend(reverse[i].iter().copied());
        }
    }

    /// Run ready goals until none are left or `max_rounds` rounds have run.
    /// Returns (executed, rounds, capped).
    fn run_rounds(&mut self, ctx: &mut C, max_rounds: usize) -> (usize, usize, bool) {
        self.analyse();
        let mut executed = 0;
        let mut rounds = 0;
        loop {
            let frontier: Vec<usize> = (0..self.goals.len())
                .filter(|&i| self.goals[i].is_ready())
                .collect();
            if frontier.is_empty() {
                return (executed, rounds, false);
            }
            if rounds == max_rounds {
                return (executed, rounds, true);
            }
            rounds += 1;
            for i in frontier {
                let ok = match &mut self.goals[i].driver {
                    Driver::Action(action) => action(ctx),
                    Driver::Extraction { .. } => continue,
                };
                executed += 1;
                tracing::debug!(goal = %self.goals[i].id, ok, round = rounds, "Goal executed");
                if ok {
                    self.succeed(i);
                } else {
                    tracing::warn!(goal = %self.goals[i].id, "Goal failed");
                    self.goals[i].state = GoalState::Failed;
                }
            }
        }
    }

    /// Run every goal that has become ready. Called after each dispatch.
    ///
    /// Each round runs at least one goal, so the number of rounds is bounded
    /// by the number of goals.
    pub fn advance(&mut self, ctx: &mut C) -> usize {
        let cap = self.goals.len() + 1;
        self.run_rounds(ctx, cap).0
    }

    /// Final pass after the stream ended. Runs at most `max_rounds` rounds,
    /// then reports whatever is still unresolved.
    pub fn flush(&mut self, ctx: &mut C, max_rounds: usize) -> FlushOutcome {
        let (executed, rounds, capped) = self.run_rounds(ctx, max_rounds);
        if capped {
            tracing::warn!(max_rounds, "Resolver round cap reached with goals still ready");
        }
        let unresolved = self.unresolved();
        tracing::info!(
            executed,
            rounds,
            unresolved = unresolved.len(),
            "Testplan flushed"
        );
        FlushOutcome {
            executed,
            rounds,
            capped,
            unresolved,
        }
    }

    /// Goals that never reached a terminal state, in declaration order.
    /// Optional extraction goals are left out.
    pub fn unresolved(&self) -> Vec<String> {
        self.goals
            .iter()
            .filter(|g| match g.state {
                GoalState::Blocked => true,
                GoalState::Pending => !matches!(g.driver, Driver::Extraction { optional: true }),
                _ => false,
            })
            .map(|g| g.id.clone())
            .collect()
    }

    /// Goals whose action returned failure, in declaration order.
    pub fn failed(&self) -> Vec<String> {
        self.goals
            .iter()
            .filter(|g| g.state == GoalState::Failed)
            .map(|g| g.id.clone())
            .collect()
    }

    pub fn outcomes(&self) -> Vec<GoalOutcome> {
        self.goals
            .iter()
            .map(|g| GoalOutcome {
                id: g.id.clone(),
                state: g.state,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Vec<&'static str>;

    fn step(name: &'static str, ok: bool) -> impl FnMut(&mut Log) -> bool {
        move |log: &mut Log| {
            log.push(name);
            ok
        }
    }

    #[test]
    fn test_goal_waits_for_extraction() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_extraction("socket_info").unwrap();
        plan.add_goal("ram_completeness", ["socket_info"], step("ram", true))
            .unwrap();
        let mut log = Log::new();

        assert_eq!(plan.advance(&mut log), 0);
        assert!(log.is_empty());

        assert!(plan.record_extraction("socket_info").unwrap());
        assert_eq!(plan.advance(&mut log), 1);
        assert_eq!(log, vec!["ram"]);
        assert_eq!(plan.state("ram_completeness"), Some(GoalState::Succeeded));
    }

    #[test]
    fn test_goal_runs_at_most_once() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("a", Vec::<String>::new(), step("a", true)).unwrap();
        let mut log = Log::new();
        plan.advance(&mut log);
        plan.advance(&mut log);
        plan.flush(&mut log, 10);
        assert_eq!(log, vec!["a"]);
    }

    #[test]
    fn test_chain_resolves_in_one_advance() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("c", ["b"], step("c", true)).unwrap();
        plan.add_goal("b", ["a"], step("b", true)).unwrap();
        plan.add_goal("a", Vec::<String>::new(), step("a", true)).unwrap();
        let mut log = Log::new();
        assert_eq!(plan.advance(&mut log), 3);
        assert_eq!(log, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_is_terminal_and_blocks_dependents() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("check", Vec::<String>::new(), step("check", false))
            .unwrap();
        plan.add_goal("qualify", ["check"], step("qualify", true)).unwrap();
        let mut log = Log::new();
        plan.advance(&mut log);
        let out = plan.flush(&mut log, 10);
        assert_eq!(log, vec!["check"]);
        assert_eq!(plan.failed(), vec!["check"]);
        assert_eq!(out.unresolved, vec!["qualify"]);
    }

    #[test]
    fn test_cycle_is_blocked_up_front() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("x", ["y"], step("x", true)).unwrap();
        plan.add_goal("y", ["x"], step("y", true)).unwrap();
        plan.add_goal("z", ["x"], step("z", true)).unwrap();
        plan.add_goal("free", Vec::<String>::new(), step("free", true))
            .unwrap();
        let mut log = Log::new();
        let out = plan.flush(&mut log, 10);
        assert_eq!(log, vec!["free"]);
        assert_eq!(out.unresolved, vec!["x", "y", "z"]);
        assert_eq!(plan.state("z"), Some(GoalState::Blocked));
        assert!(!out.capped);
    }

    #[test]
    fn test_undeclared_prerequisite_blocks() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("a", ["ghost"], step("a", true)).unwrap();
        let mut log = Log::new();
        let out = plan.flush(&mut log, 10);
        assert!(log.is_empty());
        assert_eq!(out.unresolved, vec!["a"]);

        // Declaring the missing goal later lifts the block.
        plan.add_goal("ghost", Vec::<String>::new(), step("ghost", true))
            .unwrap();
        plan.advance(&mut log);
        assert_eq!(log, vec!["ghost", "a"]);
    }

    #[test]
    fn test_declaration_errors() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_extraction("dimm_info").unwrap();
        assert_eq!(
            plan.add_extraction("dimm_info"),
            Err(PlanError::DuplicateGoal {
                id: "dimm_info".to_string()
            })
        );
        assert_eq!(
            plan.record_extraction("nope"),
            Err(PlanError::UnknownGoal {
                id: "nope".to_string()
            })
        );
        assert!(plan.record_extraction("dimm_info").unwrap());
        assert!(!plan.record_extraction("dimm_info").unwrap());
    }

    #[test]
    fn test_optional_extraction_not_reported() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_optional_extraction("mem_test").unwrap();
        plan.add_extraction("socket_info").unwrap();
        let out = plan.flush(&mut Log::new(), 10);
        assert_eq!(out.unresolved, vec!["socket_info"]);
    }

    #[test]
    fn test_flush_round_cap() {
        let mut plan: GoalPlan<Log> = GoalPlan::new();
        plan.add_goal("a", Vec::<String>::new(), step("a", true)).unwrap();
        plan.add_goal("b", ["a"], step("b", true)).unwrap();
        let mut log = Log::new();
        let out = plan.flush(&mut log, 1);
        assert!(out.capped);
        assert_eq!(out.rounds, 1);
        assert_eq!(out.unresolved, vec!["b"]);
    }
}
