// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::config::RawNode;
use crate::dag::node::{NodeId, NodeIdx, NodeSpec};
use crate::errors::GraphError;

/// Immutable deployment graph built once per run.
///
/// Two edge sets are kept, both pointing from prerequisite to dependent:
///
/// - `deps`: the canonical dependency set over every declared node, with
///   `requires` and `required_for` merged (one edge per pair, whatever the
///   declaration direction).
/// - `schedule`: the same relation lifted onto schedulable nodes (stages,
///   groups, standalone tasks). An edge touching a member task is moved to
///   that task's groups; edges inside a group become its pipeline order.
#[derive(Debug, Clone)]
pub struct DeploymentGraph {
    nodes: Vec<NodeSpec>,
    index: HashMap<NodeId, NodeIdx>,
    deps: DiGraphMap<NodeIdx, ()>,
    schedule: DiGraphMap<NodeIdx, ()>,
    /// Group -> member tasks in per-node execution order.
    pipelines: HashMap<NodeIdx, Vec<NodeIdx>>,
    /// Member task -> groups it runs in.
    memberships: HashMap<NodeIdx, Vec<NodeIdx>>,
}

impl DeploymentGraph {
    /// Build and validate a graph from declarative records.
    ///
    /// Fails on duplicate ids, dangling references, malformed parameters
    /// and cycles. Nothing is executed before this returns `Ok`.
    pub fn build(records: &[RawNode]) -> Result<Self, GraphError> {
        let mut index: HashMap<NodeId, NodeIdx> = HashMap::with_capacity(records.len());
        for (idx, raw) in records.iter().enumerate() {
            if index.insert(raw.id.clone(), idx).is_some() {
                return Err(GraphError::DuplicateId(raw.id.clone()));
            }
        }

        let nodes = records
            .iter()
            .map(NodeSpec::from_raw)
            .collect::<Result<Vec<_>, _>>()?;

        let lookup = |from: &str, to: &str| -> Result<NodeIdx, GraphError> {
            index
                .get(to)
                .copied()
                .ok_or_else(|| GraphError::DanglingReference {
                    from: from.to_string(),
                    to: to.to_string(),
                })
        };

        // Canonical dependency set: prerequisite -> dependent.
        let mut deps: DiGraphMap<NodeIdx, ()> = DiGraphMap::new();
        for idx in 0..nodes.len() {
            deps.add_node(idx);
        }
        for (idx, raw) in records.iter().enumerate() {
            for req in &raw.requires {
                deps.add_edge(lookup(&raw.id, req)?, idx, ());
            }
            for target in &raw.required_for {
                deps.add_edge(idx, lookup(&raw.id, target)?, ());
            }
        }

        let mut memberships: HashMap<NodeIdx, Vec<NodeIdx>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            let Some(task) = node.as_task() else { continue };
            for group_id in &task.groups {
                let group = lookup(&node.id, group_id)?;
                if nodes[group].as_group().is_none() {
                    return Err(GraphError::MalformedNode {
                        node: node.id.clone(),
                        reason: format!("'{group_id}' in `groups` is not a group"),
                    });
                }
                let groups = memberships.entry(idx).or_default();
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
        }

        if let Some(cycle) = find_cycle(&deps, nodes.len()) {
            return Err(cycle_error(&nodes, cycle));
        }

        let pipelines = build_pipelines(&nodes, &deps, &memberships);
        let schedule = lift_edges(&nodes, &deps, &memberships);

        if let Some(cycle) = find_cycle(&schedule, nodes.len()) {
            return Err(cycle_error(&nodes, cycle));
        }

        debug!(
            nodes = nodes.len(),
            dependency_edges = deps.edge_count(),
            schedule_edges = schedule.edge_count(),
            "deployment graph built"
        );

        Ok(Self {
            nodes,
            index,
            deps,
            schedule,
            pipelines,
            memberships,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: NodeIdx) -> &NodeSpec {
        &self.nodes[idx]
    }

    pub fn node_by_id(&self, id: &str) -> Option<&NodeSpec> {
        self.index_of(id).map(|idx| &self.nodes[idx])
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    /// All nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIdx, &NodeSpec)> {
        self.nodes.iter().enumerate()
    }

    /// Direct prerequisites of `id` in the canonical dependency set.
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.declared_neighbours(id, Direction::Incoming)
    }

    /// Direct dependents of `id` in the canonical dependency set.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.declared_neighbours(id, Direction::Outgoing)
    }

    /// Number of canonical dependency edges after merging.
    pub fn dependency_count(&self) -> usize {
        self.deps.edge_count()
    }

    /// Stages, groups and standalone tasks, in declaration order.
    pub fn schedulable(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        (0..self.nodes.len()).filter(|&idx| self.is_schedulable(idx))
    }

    pub fn is_schedulable(&self, idx: NodeIdx) -> bool {
        !self.nodes[idx].is_member_task()
    }

    /// Schedulable prerequisites of a schedulable node, in declaration order.
    pub fn schedule_predecessors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        sorted_neighbours(&self.schedule, idx, Direction::Incoming)
    }

    /// Schedulable dependents of a schedulable node, in declaration order.
    pub fn schedule_successors(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        sorted_neighbours(&self.schedule, idx, Direction::Outgoing)
    }

    /// Member tasks of a group, in the order one unit runs them.
    pub fn pipeline(&self, group: NodeIdx) -> &[NodeIdx] {
        self.pipelines
            .get(&group)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    /// Groups a member task runs in (empty for other nodes).
    pub fn groups_of(&self, task: NodeIdx) -> &[NodeIdx] {
        self.memberships
            .get(&task)
            .map(|g| g.as_slice())
            .unwrap_or(&[])
    }

    fn declared_neighbours(&self, id: &str, dir: Direction) -> Vec<&str> {
        match self.index_of(id) {
            Some(idx) => sorted_neighbours(&self.deps, idx, dir)
                .into_iter()
                .map(|n| self.nodes[n].id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }
}

fn sorted_neighbours(graph: &DiGraphMap<NodeIdx, ()>, idx: NodeIdx, dir: Direction) -> Vec<NodeIdx> {
    if !graph.contains_node(idx) {
        return Vec::new();
    }
    let mut out: Vec<NodeIdx> = graph.neighbors_directed(idx, dir).collect();
    out.sort_unstable();
    out
}

fn cycle_error(nodes: &[NodeSpec], cycle: Vec<NodeIdx>) -> GraphError {
    GraphError::CycleDetected(cycle.into_iter().map(|i| nodes[i].id.clone()).collect())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Three-colour depth-first search. Returns the first cycle found, as a
/// node sequence that starts and ends with the same node.
fn find_cycle(graph: &DiGraphMap<NodeIdx, ()>, len: usize) -> Option<Vec<NodeIdx>> {
    let mut marks = vec![Mark::White; len];
    let mut path = Vec::new();

    for start in 0..len {
        if marks[start] == Mark::White {
            if let Some(cycle) = visit(graph, start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    graph: &DiGraphMap<NodeIdx, ()>,
    node: NodeIdx,
    marks: &mut [Mark],
    path: &mut Vec<NodeIdx>,
) -> Option<Vec<NodeIdx>> {
    marks[node] = Mark::Grey;
    path.push(node);

    for next in sorted_neighbours(graph, node, Direction::Outgoing) {
        match marks[next] {
            Mark::Grey => {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Mark::White => {
                if let Some(cycle) = visit(graph, next, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Black => {}
        }
    }

    path.pop();
    marks[node] = Mark::Black;
    None
}

/// Order each group's member tasks by the edges among them, breaking ties
/// by declaration order.
fn build_pipelines(
    nodes: &[NodeSpec],
    deps: &DiGraphMap<NodeIdx, ()>,
    memberships: &HashMap<NodeIdx, Vec<NodeIdx>>,
) -> HashMap<NodeIdx, Vec<NodeIdx>> {
    let mut members: HashMap<NodeIdx, BTreeSet<NodeIdx>> = HashMap::new();
    for (&task, groups) in memberships {
        for &group in groups {
            members.entry(group).or_default().insert(task);
        }
    }

    let mut pipelines = HashMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        if node.as_group().is_none() {
            continue;
        }
        let Some(set) = members.get(&idx) else {
            pipelines.insert(idx, Vec::new());
            continue;
        };

        let mut indegree: HashMap<NodeIdx, usize> = set
            .iter()
            .map(|&t| {
                let n = deps
                    .neighbors_directed(t, Direction::Incoming)
                    .filter(|p| set.contains(p))
                    .count();
                (t, n)
            })
            .collect();

        let mut heap: BinaryHeap<Reverse<NodeIdx>> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(&t, _)| Reverse(t))
            .collect();

        let mut order = Vec::with_capacity(set.len());
        while let Some(Reverse(task)) = heap.pop() {
            order.push(task);
            for next in deps.neighbors_directed(task, Direction::Outgoing) {
                if let Some(n) = indegree.get_mut(&next) {
                    *n -= 1;
                    if *n == 0 {
                        heap.push(Reverse(next));
                    }
                }
            }
        }
        pipelines.insert(idx, order);
    }
    pipelines
}

/// Move every edge that touches a member task onto that task's groups.
///
/// A dependent group that also runs the prerequisite orders the edge in its
/// own pipeline; every other dependent group waits for all groups of the
/// prerequisite.
fn lift_edges(
    nodes: &[NodeSpec],
    deps: &DiGraphMap<NodeIdx, ()>,
    memberships: &HashMap<NodeIdx, Vec<NodeIdx>>,
) -> DiGraphMap<NodeIdx, ()> {
    let owners = |idx: NodeIdx| -> Vec<NodeIdx> {
        match memberships.get(&idx) {
            Some(groups) => groups.clone(),
            None => vec![idx],
        }
    };

    let mut schedule: DiGraphMap<NodeIdx, ()> = DiGraphMap::new();
    for (idx, node) in nodes.iter().enumerate() {
        if !node.is_member_task() {
            schedule.add_node(idx);
        }
    }

    for (from, to, _) in deps.all_edges() {
        let (sources, targets) = (owners(from), owners(to));
        for &b in targets.iter().filter(|b| !sources.contains(b)) {
            for &a in &sources {
                schedule.add_edge(a, b, ());
            }
        }
    }
    schedule
}
