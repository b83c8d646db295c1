// src/engine/core.rs

//! Pure coordinator state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`RunEvent`]s and produces:
//! - an updated status table
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Coordinator`) is responsible for:
//! - reading events from the channel
//! - calling the inventory and spawning units
//! - cancelling units on abort
//!
//! The core is the single writer of node status. It is unit tested without
//! Tokio, channels or processes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::dag::{DeploymentGraph, NodeId, NodeIdx, NodeStatus, StatusTable};
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::queue::UnitQueue;
use crate::engine::{NodeReport, RunEvent, RunOptions, RunOutcome, RunReport, RunSnapshot, RunStatus};
use crate::errors::FailureReason;

/// Per member task bookkeeping across the units that run it.
#[derive(Debug, Default)]
pub(crate) struct TaskTally {
    /// Executions owed: one per unit of every group that fanned out.
    pub(crate) expected: usize,
    pub(crate) succeeded: usize,
    pub(crate) failure: Option<FailureReason>,
    /// Groups of this task that reached fan-out.
    pub(crate) groups_run: usize,
}

#[derive(Debug)]
pub struct CoreCoordinator {
    pub(crate) graph: Arc<DeploymentGraph>,
    pub(crate) options: RunOptions,
    pub(crate) table: StatusTable,
    /// Active fan-outs keyed by owning node.
    pub(crate) queues: HashMap<NodeIdx, UnitQueue>,
    /// Nodes waiting on an inventory answer.
    pub(crate) resolving: BTreeSet<NodeIdx>,
    pub(crate) tallies: HashMap<NodeIdx, TaskTally>,
    /// Most recent non-empty ready set, for deadlock diagnostics.
    pub(crate) last_ready: Vec<NodeIdx>,
    pub(crate) outcome: Option<RunOutcome>,
    pub(crate) started: bool,
}

impl CoreCoordinator {
    pub fn new(graph: Arc<DeploymentGraph>, options: RunOptions) -> Self {
        let table = StatusTable::new(graph.len());
        Self {
            graph,
            options,
            table,
            queues: HashMap::new(),
            resolving: BTreeSet::new(),
            tallies: HashMap::new(),
            last_ready: Vec::new(),
            outcome: None,
            started: false,
        }
    }

    pub fn graph(&self) -> &DeploymentGraph {
        &self.graph
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn status_of(&self, id: &str) -> Option<NodeStatus> {
        self.graph.index_of(id).map(|idx| self.table.status(idx))
    }

    /// Units of `id` currently in flight (0 if it has no active fan-out).
    pub fn in_flight(&self, id: &str) -> usize {
        self.graph
            .index_of(id)
            .and_then(|idx| self.queues.get(&idx))
            .map(UnitQueue::in_flight)
            .unwrap_or(0)
    }

    /// Handle a single event, returning the commands for the IO shell.
    pub fn step(&mut self, event: RunEvent) -> CoreStep {
        if self.outcome.is_some() {
            tracing::debug!(?event, "run already finished; discarding event");
            return CoreStep {
                commands: Vec::new(),
                keep_running: false,
            };
        }

        let mut commands = match event {
            RunEvent::Start => self.handle_start(),
            RunEvent::MembersResolved { node, result } => {
                self.handle_members_resolved(node, result)
            }
            RunEvent::UnitCompleted { unit, results } => self.handle_unit_completed(unit, results),
            RunEvent::AbortRequested => self.handle_abort(),
        };

        self.evaluate_progress(&mut commands);

        CoreStep {
            commands,
            keep_running: self.outcome.is_none(),
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            status: self
                .outcome
                .as_ref()
                .map(RunOutcome::status)
                .unwrap_or(RunStatus::Running),
            nodes: self.node_reports(),
        }
    }

    /// Final report. A run that never reached an outcome (its event source
    /// went away) is reported as aborted.
    pub fn report(&self) -> RunReport {
        let outcome = self.outcome.clone().unwrap_or_else(|| RunOutcome::Aborted {
            outstanding_units: self
                .queues
                .values()
                .flat_map(|q| q.outstanding().map(str::to_string))
                .collect(),
        });
        RunReport {
            outcome,
            nodes: self.node_reports(),
        }
    }

    fn node_reports(&self) -> Vec<NodeReport> {
        self.graph
            .nodes()
            .map(|(idx, node)| NodeReport {
                id: node.id.clone(),
                kind: node.label(),
                status: self.table.status(idx),
                reason: self.table.reason(idx).cloned(),
            })
            .collect()
    }

    /// Finish the run once every schedulable node is terminal, or report a
    /// deadlock when nothing is in flight yet the run is incomplete.
    fn evaluate_progress(&mut self, commands: &mut Vec<CoreCommand>) {
        if self.outcome.is_some() || !self.started {
            return;
        }

        let graph = Arc::clone(&self.graph);
        let all_terminal = graph
            .schedulable()
            .all(|idx| self.table.status(idx).is_terminal());

        if all_terminal {
            let outcome = self.compute_outcome();
            self.finish(outcome, commands);
            return;
        }

        if self.queues.is_empty() && self.resolving.is_empty() {
            let pending: Vec<NodeId> = graph
                .schedulable()
                .filter(|&idx| !self.table.status(idx).is_terminal())
                .map(|idx| graph.node(idx).id.clone())
                .collect();
            let ready = self.ids(&self.last_ready);
            error!(?ready, ?pending, "no work in flight but the run is incomplete: deadlock");

            commands.push(CoreCommand::CancelUnits);
            self.finish(
                RunOutcome::Deadlock {
                    ready,
                    pending,
                    outstanding_units: 0,
                },
                commands,
            );
        }
    }

    fn compute_outcome(&self) -> RunOutcome {
        let terminal = self
            .options
            .terminal_stage
            .as_deref()
            .and_then(|id| self.graph.index_of(id));

        let success = match terminal {
            Some(idx) => self.table.status(idx).is_success(),
            None => self
                .graph
                .schedulable()
                .all(|idx| self.table.status(idx).is_success()),
        };

        if success {
            RunOutcome::Success
        } else {
            RunOutcome::Failure {
                failed: self.failed_ids(),
            }
        }
    }

    pub(crate) fn finish(&mut self, outcome: RunOutcome, commands: &mut Vec<CoreCommand>) {
        match &outcome {
            RunOutcome::Success => info!("deployment run succeeded"),
            other => warn!(outcome = ?other, "deployment run did not succeed"),
        }
        self.outcome = Some(outcome.clone());
        commands.push(CoreCommand::Finish(outcome));
    }

    pub(crate) fn failed_ids(&self) -> Vec<NodeId> {
        self.table
            .iter()
            .filter(|(_, state)| state.status == NodeStatus::Failed)
            .map(|(idx, _)| self.graph.node(idx).id.clone())
            .collect()
    }

    pub(crate) fn ids(&self, idxs: &[NodeIdx]) -> Vec<NodeId> {
        idxs.iter().map(|&i| self.graph.node(i).id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawNode, RawParameters, RawStrategy};
    use crate::engine::{StepResult, UnitSpec};

    fn raw(id: &str, kind: &str, requires: &[&str]) -> RawNode {
        RawNode {
            id: id.to_string(),
            kind: kind.to_string(),
            role: Vec::new(),
            groups: Vec::new(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            required_for: Vec::new(),
            parameters: RawParameters::default(),
        }
    }

    fn group(id: &str, strategy: &str, amount: Option<i64>, requires: &[&str]) -> RawNode {
        let mut node = raw(id, "group", requires);
        node.role = vec![id.to_string()];
        node.parameters.strategy = Some(RawStrategy {
            kind: strategy.to_string(),
            amount,
        });
        node
    }

    fn task(id: &str, groups: &[&str]) -> RawNode {
        let mut node = raw(id, "shell", &[]);
        node.groups = groups.iter().map(|s| s.to_string()).collect();
        node
    }

    fn core(records: Vec<RawNode>, options: RunOptions) -> CoreCoordinator {
        let graph = DeploymentGraph::build(&records).unwrap();
        CoreCoordinator::new(Arc::new(graph), options)
    }

    fn dispatched(step: &CoreStep) -> Vec<UnitSpec> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::DispatchUnits(units) => Some(units.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn resolutions(step: &CoreStep) -> Vec<NodeIdx> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::ResolveMembers { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }

    fn resolved(node: NodeIdx, targets: &[&str]) -> RunEvent {
        RunEvent::MembersResolved {
            node,
            result: Ok(targets.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn done(unit: &UnitSpec) -> RunEvent {
        RunEvent::UnitCompleted {
            unit: unit.id,
            results: unit
                .steps
                .iter()
                .map(|s| StepResult {
                    task: s.task,
                    outcome: Ok(()),
                })
                .collect(),
        }
    }

    fn failed(unit: &UnitSpec) -> RunEvent {
        RunEvent::UnitCompleted {
            unit: unit.id,
            results: vec![StepResult {
                task: unit.steps[0].task,
                outcome: Err(FailureReason::Executor("exit 1".into())),
            }],
        }
    }

    #[test]
    fn stage_only_graph_finishes_without_dispatch() {
        let mut c = core(
            vec![
                raw("deploy_start", "stage", &[]),
                raw("deploy_end", "stage", &["deploy_start"]),
            ],
            RunOptions {
                terminal_stage: Some("deploy_end".into()),
                ..RunOptions::default()
            },
        );
        let step = c.step(RunEvent::Start);
        assert!(!step.keep_running);
        assert!(dispatched(&step).is_empty());
        assert_eq!(c.outcome(), Some(&RunOutcome::Success));
        assert_eq!(c.status_of("deploy_end"), Some(NodeStatus::Succeeded));
    }

    #[test]
    fn one_by_one_group_serialises_units() {
        let mut c = core(
            vec![
                group("controller", "one_by_one", None, &[]),
                task("netconfig", &["controller"]),
            ],
            RunOptions::default(),
        );
        let step = c.step(RunEvent::Start);
        assert_eq!(resolutions(&step), vec![0]);

        let mut units = dispatched(&c.step(resolved(0, &["n1", "n2", "n3"])));
        let mut order = Vec::new();
        while let Some(unit) = units.pop() {
            assert_eq!(c.in_flight("controller"), 1);
            order.push(unit.target.clone().unwrap());
            units.extend(dispatched(&c.step(done(&unit))));
        }

        assert_eq!(order, vec!["n1", "n2", "n3"]);
        assert_eq!(c.outcome(), Some(&RunOutcome::Success));
        assert_eq!(c.status_of("netconfig"), Some(NodeStatus::Succeeded));
    }

    #[test]
    fn failed_group_skips_dependents_but_not_independent_branches() {
        let mut c = core(
            vec![
                group("controller", "parallel", None, &[]),
                group("compute", "parallel", None, &["controller"]),
                group("zabbix", "parallel", None, &[]),
                raw("deploy_end", "stage", &["compute", "zabbix"]),
                task("ctl", &["controller"]),
                task("cmp", &["compute"]),
                task("zbx", &["zabbix"]),
            ],
            RunOptions {
                terminal_stage: Some("deploy_end".into()),
                ..RunOptions::default()
            },
        );
        let step = c.step(RunEvent::Start);
        assert_eq!(resolutions(&step), vec![0, 2]);

        let ctl = dispatched(&c.step(resolved(0, &["n1"])));
        let zbx = dispatched(&c.step(resolved(2, &["n9"])));

        c.step(failed(&ctl[0]));
        assert_eq!(c.status_of("controller"), Some(NodeStatus::Failed));
        assert_eq!(c.status_of("compute"), Some(NodeStatus::Skipped));
        assert_eq!(c.status_of("deploy_end"), Some(NodeStatus::Skipped));
        assert_eq!(c.status_of("cmp"), Some(NodeStatus::Skipped));
        assert_eq!(c.status_of("ctl"), Some(NodeStatus::Failed));
        assert!(!c.is_finished(), "zabbix is still running");

        c.step(done(&zbx[0]));
        assert_eq!(c.status_of("zabbix"), Some(NodeStatus::Succeeded));
        assert_eq!(
            c.outcome(),
            Some(&RunOutcome::Failure {
                failed: vec!["controller".to_string(), "ctl".to_string()]
            })
        );
    }

    #[test]
    fn inventory_failure_fails_group_and_skips_members() {
        let mut c = core(
            vec![group("cinder", "parallel", None, &[]), task("cinder_cfg", &["cinder"])],
            RunOptions::default(),
        );
        c.step(RunEvent::Start);
        c.step(RunEvent::MembersResolved {
            node: 0,
            result: Err("inventory unreachable".into()),
        });
        let report = c.report();
        assert_eq!(report.node_status("cinder"), Some(NodeStatus::Failed));
        assert_eq!(
            report.node("cinder").unwrap().reason,
            Some(FailureReason::Inventory("inventory unreachable".into()))
        );
        assert_eq!(report.node_status("cinder_cfg"), Some(NodeStatus::Skipped));
    }

    #[test]
    fn empty_role_resolution_succeeds_vacuously() {
        let mut c = core(
            vec![group("mongo", "parallel", None, &[]), task("mongo_cfg", &["mongo"])],
            RunOptions::default(),
        );
        c.step(RunEvent::Start);
        let step = c.step(resolved(0, &[]));
        assert!(dispatched(&step).is_empty());
        assert_eq!(c.outcome(), Some(&RunOutcome::Success));
    }

    #[test]
    fn fault_tolerance_absorbs_a_failed_unit() {
        let mut records = vec![
            group("compute", "parallel", None, &[]),
            task("nova", &["compute"]),
            raw("deploy_end", "stage", &["compute"]),
        ];
        records[0].parameters.fault_tolerance = Some(1);
        let mut c = core(records, RunOptions::default());
        c.step(RunEvent::Start);
        let units = dispatched(&c.step(resolved(0, &["n1", "n2"])));
        c.step(failed(&units[0]));
        c.step(done(&units[1]));

        assert_eq!(c.status_of("compute"), Some(NodeStatus::Succeeded));
        assert_eq!(c.status_of("deploy_end"), Some(NodeStatus::Succeeded));
        // The task itself did fail on one node.
        assert_eq!(c.status_of("nova"), Some(NodeStatus::Failed));
    }

    #[test]
    fn abort_cancels_units_and_closes_out_statuses() {
        let mut c = core(
            vec![
                group("controller", "parallel", Some(2), &[]),
                task("netconfig", &["controller"]),
                raw("deploy_end", "stage", &["controller"]),
            ],
            RunOptions::default(),
        );
        c.step(RunEvent::Start);
        let units = dispatched(&c.step(resolved(0, &["n1", "n2", "n3"])));
        assert_eq!(units.len(), 2);

        let step = c.step(RunEvent::AbortRequested);
        assert!(step.commands.iter().any(|c| matches!(c, CoreCommand::CancelUnits)));
        assert!(!step.keep_running);

        match c.outcome() {
            Some(RunOutcome::Aborted { outstanding_units }) => {
                assert_eq!(
                    outstanding_units,
                    &vec!["controller#0@n1".to_string(), "controller#1@n2".to_string()]
                );
            }
            other => panic!("expected Aborted, got {other:?}"),
        }
        let report = c.report();
        assert_eq!(report.node_status("controller"), Some(NodeStatus::Failed));
        assert_eq!(report.node("controller").unwrap().reason, Some(FailureReason::Aborted));
        assert_eq!(report.node_status("deploy_end"), Some(NodeStatus::Skipped));

        // Late completions are discarded.
        let late = c.step(done(&units[0]));
        assert!(late.commands.is_empty());
    }

    #[test]
    fn fail_fast_turns_first_failure_into_run_failure() {
        let mut c = core(
            vec![
                group("controller", "parallel", None, &[]),
                group("zabbix", "parallel", None, &[]),
                task("ctl", &["controller"]),
                task("zbx", &["zabbix"]),
            ],
            RunOptions {
                fail_fast: true,
                ..RunOptions::default()
            },
        );
        c.step(RunEvent::Start);
        let ctl = dispatched(&c.step(resolved(0, &["n1"])));
        dispatched(&c.step(resolved(1, &["n2"])));

        let step = c.step(failed(&ctl[0]));
        assert!(step.commands.iter().any(|c| matches!(c, CoreCommand::CancelUnits)));
        assert_eq!(c.status_of("zabbix"), Some(NodeStatus::Failed));
        assert!(matches!(c.outcome(), Some(RunOutcome::Failure { .. })));
    }

    #[test]
    fn stalled_run_is_reported_as_deadlock() {
        let mut c = core(
            vec![raw("a", "stage", &[]), raw("b", "stage", &["a"])],
            RunOptions::default(),
        );
        c.started = true;
        // Nothing in flight, nothing resolving, and both nodes still pending.
        let mut commands = Vec::new();
        c.evaluate_progress(&mut commands);

        match c.outcome() {
            Some(RunOutcome::Deadlock { pending, .. }) => {
                assert_eq!(pending, &vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Deadlock, got {other:?}"),
        }
        assert!(commands.iter().any(|c| matches!(c, CoreCommand::Finish(_))));
    }
}
