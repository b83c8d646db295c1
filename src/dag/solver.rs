// src/dag/solver.rs

//! Incremental readiness over the schedulable part of the graph.
//!
//! Readiness is recomputed as statuses change: after seeding, only the
//! dependents of a node that just reached a terminal state are examined.
//! A node leaves `pending` exactly once, either to `ready` (every
//! prerequisite succeeded) or to `skipped` (some prerequisite failed or was
//! skipped), so it is never reported ready twice.

use tracing::debug;

use crate::dag::graph::DeploymentGraph;
use crate::dag::node::{NodeId, NodeIdx};
use crate::dag::status::{NodeStatus, StatusTable};

/// What changed in one solver evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverStep {
    /// Nodes moved `pending -> ready`, in declaration order.
    pub newly_ready: Vec<NodeIdx>,
    /// Nodes moved `pending -> skipped`, including transitive dependents.
    pub newly_skipped: Vec<NodeIdx>,
}

impl SolverStep {
    pub fn is_empty(&self) -> bool {
        self.newly_ready.is_empty() && self.newly_skipped.is_empty()
    }

    pub fn merge(&mut self, other: SolverStep) {
        self.newly_ready.extend(other.newly_ready);
        self.newly_skipped.extend(other.newly_skipped);
    }
}

/// Readiness view over a graph. Cheap to construct; holds no state.
#[derive(Debug, Clone, Copy)]
pub struct TopologySolver<'g> {
    graph: &'g DeploymentGraph,
}

impl<'g> TopologySolver<'g> {
    pub fn new(graph: &'g DeploymentGraph) -> Self {
        Self { graph }
    }

    /// Pending schedulable nodes whose prerequisites have all succeeded.
    ///
    /// Pure query; does not change any status.
    pub fn ready(&self, table: &StatusTable) -> Vec<NodeIdx> {
        self.graph
            .schedulable()
            .filter(|&idx| {
                table.status(idx) == NodeStatus::Pending && self.prerequisites_met(idx, table)
            })
            .collect()
    }

    /// Evaluate every schedulable node. Nodes without prerequisites become
    /// ready immediately.
    pub fn seed(&self, table: &mut StatusTable) -> SolverStep {
        let candidates: Vec<NodeIdx> = self.graph.schedulable().collect();
        self.evaluate(candidates, table)
    }

    /// Re-evaluate the dependents of `finished`, which just became terminal.
    pub fn settle(&self, finished: NodeIdx, table: &mut StatusTable) -> SolverStep {
        let candidates = self.graph.schedule_successors(finished);
        self.evaluate(candidates, table)
    }

    fn prerequisites_met(&self, idx: NodeIdx, table: &StatusTable) -> bool {
        self.graph
            .schedule_predecessors(idx)
            .into_iter()
            .all(|p| table.status(p).is_success())
    }

    fn prerequisite_lost(&self, idx: NodeIdx, table: &StatusTable) -> bool {
        self.graph.schedule_predecessors(idx).into_iter().any(|p| {
            matches!(table.status(p), NodeStatus::Failed | NodeStatus::Skipped)
        })
    }

    fn evaluate(&self, mut stack: Vec<NodeIdx>, table: &mut StatusTable) -> SolverStep {
        let mut step = SolverStep::default();
        stack.reverse();

        while let Some(idx) = stack.pop() {
            if table.status(idx) != NodeStatus::Pending {
                continue;
            }

            if self.prerequisite_lost(idx, table) {
                table.advance(idx, NodeStatus::Skipped);
                debug!(node = %self.graph.node(idx).id, "prerequisite failed; skipping");
                step.newly_skipped.push(idx);
                stack.extend(self.graph.schedule_successors(idx));
            } else if self.prerequisites_met(idx, table) {
                table.advance(idx, NodeStatus::Ready);
                step.newly_ready.push(idx);
            }
        }

        step.newly_ready.sort_unstable();
        step
    }
}

/// Simulate a run in which everything succeeds and return the successive
/// ready sets, by id. Used for dry runs.
pub fn plan_waves(graph: &DeploymentGraph) -> Vec<Vec<NodeId>> {
    let solver = TopologySolver::new(graph);
    let mut table = StatusTable::new(graph.len());
    let mut waves = Vec::new();
    let mut wave = solver.seed(&mut table).newly_ready;

    while !wave.is_empty() {
        waves.push(wave.iter().map(|&i| graph.node(i).id.clone()).collect());

        let mut next = Vec::new();
        for &idx in &wave {
            table.advance(idx, NodeStatus::Running);
            table.advance(idx, NodeStatus::Succeeded);
        }
        for &idx in &wave {
            next.extend(solver.settle(idx, &mut table).newly_ready);
        }
        next.sort_unstable();
        wave = next;
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawNode, RawParameters};

    fn stage(id: &str, requires: &[&str]) -> RawNode {
        RawNode {
            id: id.to_string(),
            kind: "stage".to_string(),
            role: Vec::new(),
            groups: Vec::new(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            required_for: Vec::new(),
            parameters: RawParameters::default(),
        }
    }

    fn diamond() -> DeploymentGraph {
        DeploymentGraph::build(&[
            stage("start", &[]),
            stage("left", &["start"]),
            stage("right", &["start"]),
            stage("end", &["left", "right"]),
        ])
        .unwrap()
    }

    fn finish(table: &mut StatusTable, idx: NodeIdx, status: NodeStatus) {
        table.advance(idx, NodeStatus::Running);
        table.advance(idx, status);
    }

    #[test]
    fn roots_are_ready_immediately() {
        let graph = diamond();
        let mut table = StatusTable::new(graph.len());
        let step = TopologySolver::new(&graph).seed(&mut table);
        assert_eq!(step.newly_ready, vec![0]);
        assert_eq!(table.status(0), NodeStatus::Ready);
    }

    #[test]
    fn join_waits_for_every_prerequisite() {
        let graph = diamond();
        let solver = TopologySolver::new(&graph);
        let mut table = StatusTable::new(graph.len());
        solver.seed(&mut table);
        finish(&mut table, 0, NodeStatus::Succeeded);
        assert_eq!(solver.settle(0, &mut table).newly_ready, vec![1, 2]);

        finish(&mut table, 1, NodeStatus::Succeeded);
        assert!(solver.settle(1, &mut table).newly_ready.is_empty());

        finish(&mut table, 2, NodeStatus::Succeeded);
        assert_eq!(solver.settle(2, &mut table).newly_ready, vec![3]);
    }

    #[test]
    fn node_is_never_reported_ready_twice() {
        let graph = diamond();
        let solver = TopologySolver::new(&graph);
        let mut table = StatusTable::new(graph.len());
        assert_eq!(solver.seed(&mut table).newly_ready, vec![0]);
        assert!(solver.seed(&mut table).newly_ready.is_empty());
        assert!(solver.ready(&table).is_empty());
    }

    #[test]
    fn failure_skips_transitive_dependents() {
        let graph = diamond();
        let solver = TopologySolver::new(&graph);
        let mut table = StatusTable::new(graph.len());
        solver.seed(&mut table);
        finish(&mut table, 0, NodeStatus::Succeeded);
        solver.settle(0, &mut table);

        finish(&mut table, 1, NodeStatus::Failed);
        let step = solver.settle(1, &mut table);
        assert_eq!(step.newly_skipped, vec![3]);
        assert_eq!(table.status(3), NodeStatus::Skipped);
        // The sibling branch is untouched.
        assert_eq!(table.status(2), NodeStatus::Ready);
    }

    #[test]
    fn waves_follow_dependency_depth() {
        let waves = plan_waves(&diamond());
        assert_eq!(
            waves,
            vec![
                vec!["start".to_string()],
                vec!["left".to_string(), "right".to_string()],
                vec!["end".to_string()],
            ]
        );
    }
}
