// src/dag/status.rs

//! Runtime status of every node in a run.
//!
//! The table is owned by the coordinator core; nothing else mutates it.
//! Transitions only move forward:
//! `pending -> ready -> running -> {succeeded | failed | skipped}`
//! (steps may be skipped, e.g. `pending -> skipped`, but never reversed).

use serde::Serialize;
use tracing::warn;

use crate::dag::node::NodeIdx;
use crate::errors::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    pub fn is_success(self) -> bool {
        self == NodeStatus::Succeeded
    }

    fn rank(self) -> u8 {
        match self {
            NodeStatus::Pending => 0,
            NodeStatus::Ready => 1,
            NodeStatus::Running => 2,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub status: NodeStatus,
    pub reason: Option<FailureReason>,
}

#[derive(Debug, Clone)]
pub struct StatusTable {
    states: Vec<NodeState>,
}

impl StatusTable {
    /// Every node starts `pending`.
    pub fn new(len: usize) -> Self {
        Self {
            states: vec![
                NodeState {
                    status: NodeStatus::Pending,
                    reason: None,
                };
                len
            ],
        }
    }

    pub fn status(&self, idx: NodeIdx) -> NodeStatus {
        self.states[idx].status
    }

    pub fn reason(&self, idx: NodeIdx) -> Option<&FailureReason> {
        self.states[idx].reason.as_ref()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Move `idx` to `to`. Returns `false` (and leaves the state untouched)
    /// if that would not be a forward transition.
    pub fn advance(&mut self, idx: NodeIdx, to: NodeStatus) -> bool {
        let state = &mut self.states[idx];
        let from = state.status;
        if from.is_terminal() || to.rank() <= from.rank() {
            warn!(node = idx, ?from, ?to, "rejected backward status transition");
            return false;
        }
        state.status = to;
        true
    }

    /// Mark `idx` failed with a reason.
    pub fn fail(&mut self, idx: NodeIdx, reason: FailureReason) -> bool {
        if self.advance(idx, NodeStatus::Failed) {
            self.states[idx].reason = Some(reason);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeIdx, &NodeState)> {
        self.states.iter().enumerate()
    }
}
