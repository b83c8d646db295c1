// src/engine/event_handlers.rs

//! Event handling logic for the coordinator core.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::{NodeIdx, NodeStatus, SolverStep, TopologySolver, limit_for};
use crate::engine::core::{CoreCoordinator, TaskTally};
use crate::engine::queue::UnitQueue;
use crate::engine::{RunOutcome, StepResult, StepSpec, UnitId, UnitSpec};
use crate::errors::FailureReason;
use crate::exec::TaskInvocation;

/// Command produced by the pure core, executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Ask the inventory which nodes `roles` map to; answer with
    /// `RunEvent::MembersResolved`.
    ResolveMembers { node: NodeIdx, roles: Vec<String> },
    /// Start these units.
    DispatchUnits(Vec<UnitSpec>),
    /// Signal every in-flight unit to stop. Late completions are discarded.
    CancelUnits,
    /// The run is over.
    Finish(RunOutcome),
}

/// Decision returned by the core after handling a single `RunEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

/// Why a run is being torn down early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortKind {
    Caller,
    FailFast,
}

impl CoreCoordinator {
    /// Seed the run: every node without prerequisites becomes ready.
    pub(crate) fn handle_start(&mut self) -> Vec<CoreCommand> {
        let mut commands = Vec::new();
        if self.started {
            warn!("start requested twice; ignoring");
            return commands;
        }
        self.started = true;

        let graph = Arc::clone(&self.graph);
        let step = TopologySolver::new(&graph).seed(&mut self.table);
        info!(
            nodes = graph.len(),
            roots = ?self.ids(&step.newly_ready),
            "deployment run started"
        );
        self.absorb(step, &mut commands);
        commands
    }

    pub(crate) fn handle_members_resolved(
        &mut self,
        node: NodeIdx,
        result: Result<Vec<String>, String>,
    ) -> Vec<CoreCommand> {
        let mut commands = Vec::new();
        if !self.resolving.remove(&node) {
            debug!(node, "membership answer for a node not awaiting one; ignoring");
            return commands;
        }

        let graph = Arc::clone(&self.graph);
        let id = &graph.node(node).id;
        let step = match result {
            Ok(targets) => {
                info!(node = %id, ?targets, "members resolved");
                self.begin_fan_out(node, targets.into_iter().map(Some).collect(), &mut commands)
            }
            Err(err) => {
                warn!(node = %id, error = %err, "inventory lookup failed");
                self.complete_node(node, Err(FailureReason::Inventory(err)), &mut commands)
            }
        };

        if let Some(step) = step {
            self.absorb(step, &mut commands);
        }
        commands
    }

    pub(crate) fn handle_unit_completed(
        &mut self,
        unit: UnitId,
        results: Vec<StepResult>,
    ) -> Vec<CoreCommand> {
        let mut commands = Vec::new();
        let failure = results.iter().find_map(|r| r.outcome.clone().err());

        let Some(queue) = self.queues.get_mut(&unit.owner) else {
            debug!(?unit, "completion for a node that is no longer active; discarding");
            return commands;
        };
        if !queue.complete(unit, failure.clone()) {
            return commands;
        }
        let released = queue.release();
        let verdict = queue.verdict();

        if !released.is_empty() {
            commands.push(CoreCommand::DispatchUnits(released));
        }

        for result in &results {
            if result.task == unit.owner {
                continue;
            }
            let tally = self.tallies.entry(result.task).or_default();
            match &result.outcome {
                Ok(()) => tally.succeeded += 1,
                Err(reason) => {
                    if tally.failure.is_none() {
                        tally.failure = Some(reason.clone());
                    }
                }
            }
        }

        let owner = &self.graph.node(unit.owner).id;
        match &failure {
            Some(reason) => warn!(node = %owner, unit = unit.index, %reason, "unit failed"),
            None => debug!(node = %owner, unit = unit.index, "unit succeeded"),
        }

        if let Some(verdict) = verdict {
            self.queues.remove(&unit.owner);
            if let Some(step) = self.complete_node(unit.owner, verdict, &mut commands) {
                self.absorb(step, &mut commands);
            }
        }
        commands
    }

    pub(crate) fn handle_abort(&mut self) -> Vec<CoreCommand> {
        let mut commands = Vec::new();
        warn!("abort requested by caller");
        self.abort_run(AbortKind::Caller, &mut commands);
        commands
    }

    /// Apply a solver step, activating ready nodes until nothing new becomes
    /// ready synchronously (stages and empty groups finish on the spot).
    fn absorb(&mut self, step: SolverStep, commands: &mut Vec<CoreCommand>) {
        let mut ready: VecDeque<NodeIdx> = VecDeque::new();
        let mut skipped = Vec::new();
        self.note_step(step, &mut ready, &mut skipped);

        loop {
            for idx in skipped.drain(..) {
                self.on_skipped(idx);
            }
            let Some(idx) = ready.pop_front() else {
                break;
            };
            if self.outcome.is_some() {
                break;
            }
            if let Some(next) = self.activate(idx, commands) {
                self.note_step(next, &mut ready, &mut skipped);
            }
        }
    }

    fn note_step(
        &mut self,
        step: SolverStep,
        ready: &mut VecDeque<NodeIdx>,
        skipped: &mut Vec<NodeIdx>,
    ) {
        if !step.newly_ready.is_empty() {
            self.last_ready = step.newly_ready.clone();
        }
        ready.extend(step.newly_ready);
        skipped.extend(step.newly_skipped);
    }

    /// Start work for a node that just became ready.
    fn activate(&mut self, idx: NodeIdx, commands: &mut Vec<CoreCommand>) -> Option<SolverStep> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(idx);

        if node.is_stage() {
            self.table.advance(idx, NodeStatus::Succeeded);
            info!(stage = %node.id, "stage reached");
            return Some(TopologySolver::new(&graph).settle(idx, &mut self.table));
        }

        self.table.advance(idx, NodeStatus::Running);

        if node.as_group().is_some() && graph.pipeline(idx).is_empty() {
            info!(group = %node.id, "group has no tasks; nothing to dispatch");
            return self.begin_fan_out(idx, Vec::new(), commands);
        }

        if node.roles.is_empty() {
            return self.begin_fan_out(idx, vec![None], commands);
        }

        debug!(node = %node.id, roles = ?node.roles, "resolving members");
        self.resolving.insert(idx);
        commands.push(CoreCommand::ResolveMembers {
            node: idx,
            roles: node.roles.clone(),
        });
        None
    }

    /// Queue one unit per target and release what the limit allows.
    fn begin_fan_out(
        &mut self,
        idx: NodeIdx,
        targets: Vec<Option<String>>,
        commands: &mut Vec<CoreCommand>,
    ) -> Option<SolverStep> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(idx);
        let steps = self.unit_steps(idx);

        let units: Vec<UnitSpec> = targets
            .into_iter()
            .enumerate()
            .map(|(index, target)| UnitSpec {
                id: UnitId { owner: idx, index },
                owner: node.id.clone(),
                target,
                steps: steps.clone(),
            })
            .collect();

        for &task in graph.pipeline(idx) {
            let tally = self.tallies.entry(task).or_default();
            tally.expected += units.len();
            tally.groups_run += 1;
            if self.table.status(task) == NodeStatus::Pending {
                self.table.advance(task, NodeStatus::Running);
            }
        }

        let tolerance = node
            .as_group()
            .and_then(|g| g.fault_tolerance)
            .unwrap_or(self.options.fault_tolerance);
        let limit = limit_for(node);

        info!(
            node = %node.id,
            units = units.len(),
            steps = steps.len(),
            ?limit,
            tolerance,
            "fanning out"
        );

        let mut queue = UnitQueue::new(limit, tolerance, units);
        let released = queue.release();
        if !released.is_empty() {
            commands.push(CoreCommand::DispatchUnits(released));
        }

        match queue.verdict() {
            Some(verdict) => self.complete_node(idx, verdict, commands),
            None => {
                self.queues.insert(idx, queue);
                None
            }
        }
    }

    fn unit_steps(&self, idx: NodeIdx) -> Vec<StepSpec> {
        let tasks: Vec<NodeIdx> = if self.graph.node(idx).as_group().is_some() {
            self.graph.pipeline(idx).to_vec()
        } else {
            vec![idx]
        };

        tasks
            .into_iter()
            .filter_map(|task| {
                let node = self.graph.node(task);
                let spec = node.as_task()?;
                Some(StepSpec {
                    task,
                    invocation: TaskInvocation {
                        task: node.id.clone(),
                        kind: spec.kind.clone(),
                        params: spec.params.clone(),
                        timeout: spec.params.timeout().or(self.options.default_timeout),
                    },
                })
            })
            .collect()
    }

    /// Record a node's verdict and re-evaluate its dependents.
    fn complete_node(
        &mut self,
        idx: NodeIdx,
        verdict: Result<(), FailureReason>,
        commands: &mut Vec<CoreCommand>,
    ) -> Option<SolverStep> {
        let graph = Arc::clone(&self.graph);
        let id = &graph.node(idx).id;
        let failed = verdict.is_err();

        match verdict {
            Ok(()) => {
                self.table.advance(idx, NodeStatus::Succeeded);
                info!(node = %id, "node succeeded");
            }
            Err(reason) => {
                warn!(node = %id, %reason, "node failed; dependents will be skipped");
                self.table.fail(idx, reason);
            }
        }
        self.finalize_members(idx);

        if failed && self.options.fail_fast {
            warn!(node = %id, "fail_fast is set; aborting the run");
            self.abort_run(AbortKind::FailFast, commands);
            return None;
        }

        Some(TopologySolver::new(&graph).settle(idx, &mut self.table))
    }

    fn on_skipped(&mut self, idx: NodeIdx) {
        let graph = Arc::clone(&self.graph);
        info!(node = %graph.node(idx).id, "skipped: a prerequisite did not succeed");
        self.finalize_members(idx);
    }

    /// Derive member task statuses once every group they run in is over.
    fn finalize_members(&mut self, group: NodeIdx) {
        let graph = Arc::clone(&self.graph);

        for &task in graph.pipeline(group) {
            if self.table.status(task).is_terminal() {
                continue;
            }
            let groups = graph.groups_of(task);
            if !groups.iter().all(|&g| self.table.status(g).is_terminal()) {
                continue;
            }

            let tally: TaskTally = self.tallies.remove(&task).unwrap_or_default();
            let ran_everywhere =
                tally.groups_run == groups.len() && tally.succeeded == tally.expected;

            match tally.failure {
                Some(reason) => {
                    self.table.fail(task, reason);
                }
                None if ran_everywhere => {
                    self.table.advance(task, NodeStatus::Succeeded);
                }
                None => {
                    self.table.advance(task, NodeStatus::Skipped);
                }
            }
        }
    }

    /// Cancel everything in flight and close out every non-terminal node.
    pub(crate) fn abort_run(&mut self, kind: AbortKind, commands: &mut Vec<CoreCommand>) {
        let outstanding: Vec<String> = self
            .queues
            .values()
            .flat_map(|q| q.outstanding().map(str::to_string))
            .collect();

        commands.push(CoreCommand::CancelUnits);
        self.queues.clear();
        self.resolving.clear();

        for idx in 0..self.graph.len() {
            match self.table.status(idx) {
                NodeStatus::Running => {
                    self.table.fail(idx, FailureReason::Aborted);
                }
                NodeStatus::Pending | NodeStatus::Ready => {
                    self.table.advance(idx, NodeStatus::Skipped);
                }
                _ => {}
            }
        }

        let outcome = match kind {
            AbortKind::Caller => RunOutcome::Aborted {
                outstanding_units: outstanding,
            },
            AbortKind::FailFast => RunOutcome::Failure {
                failed: self.failed_ids(),
            },
        };
        self.finish(outcome, commands);
    }
}
