// src/engine/mod.rs

//! Execution coordinator.
//!
//! This module ties together:
//! - the readiness solver and status table
//! - per-node unit queues enforcing each group's concurrency limit
//! - the run loop reacting to inventory lookups, unit completions and
//!   abort requests
//!
//! The pure core state machine lives in [`core`] (with its handlers in
//! [`event_handlers`]); the async/IO shell is [`runtime`], and
//! [`handle`] exposes `start_run` / `abort` / `status` to callers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::ConfigSection;
use crate::dag::{KindLabel, NodeId, NodeIdx, NodeStatus};
use crate::errors::FailureReason;
use crate::exec::TaskInvocation;

/// Identity of one fanned-out unit: its owning node and queue position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId {
    pub owner: NodeIdx,
    pub index: usize,
}

/// One task of a unit's pipeline.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub task: NodeIdx,
    pub invocation: TaskInvocation,
}

/// A unit of work bound to one target node.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    pub id: UnitId,
    /// Id of the owning group or standalone task, for logs.
    pub owner: NodeId,
    pub target: Option<String>,
    /// Run in order; the unit stops at the first failed step.
    pub steps: Vec<StepSpec>,
}

impl UnitSpec {
    /// `owner#index@target`, used in logs and abort diagnostics.
    pub fn label(&self) -> String {
        format!(
            "{}#{}@{}",
            self.owner,
            self.id.index,
            self.target.as_deref().unwrap_or("local")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub task: NodeIdx,
    pub outcome: Result<(), FailureReason>,
}

/// Events flowing into the coordinator core.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Seed the run: evaluate roots.
    Start,
    /// Inventory answered for a group or fanned-out task.
    MembersResolved {
        node: NodeIdx,
        result: Result<Vec<String>, String>,
    },
    /// A unit finished (or stopped at its first failed step).
    UnitCompleted {
        unit: UnitId,
        results: Vec<StepResult>,
    },
    AbortRequested,
}

/// Run-level behaviour derived from the `config` section.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stage whose success defines a successful run.
    pub terminal_stage: Option<String>,
    pub fault_tolerance: usize,
    pub default_timeout: Option<Duration>,
    pub fail_fast: bool,
}

impl RunOptions {
    pub fn from_config(section: &ConfigSection) -> Self {
        Self {
            terminal_stage: section.terminal_stage.clone(),
            fault_tolerance: section.fault_tolerance,
            default_timeout: section.default_timeout.map(Duration::from_secs),
            fail_fast: section.fail_fast,
        }
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// At least one required branch failed.
    Failure { failed: Vec<NodeId> },
    /// No node can make progress, yet the run is not finished.
    Deadlock {
        ready: Vec<NodeId>,
        pending: Vec<NodeId>,
        outstanding_units: usize,
    },
    /// The caller aborted the run.
    Aborted { outstanding_units: Vec<String> },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Success => RunStatus::Success,
            RunOutcome::Failure { .. } => RunStatus::Failure,
            RunOutcome::Deadlock { .. } => RunStatus::Deadlock,
            RunOutcome::Aborted { .. } => RunStatus::Aborted,
        }
    }
}

/// Coarse state of a run, as seen through a [`RunHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Deadlock,
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Deadlock => "deadlock",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One row of the per-node status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub kind: KindLabel,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

/// Point-in-time view of a run, published after every coordinator step.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub nodes: Vec<NodeReport>,
}

impl RunSnapshot {
    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.nodes.iter().find(|n| n.id == id).map(|n| n.status)
    }
}

/// What the caller gets back once the run is over.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub outcome: RunOutcome,
    /// Every node, in declaration order.
    pub nodes: Vec<NodeReport>,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.outcome.status()
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }
}

pub mod core;
pub mod event_handlers;
pub mod handle;
pub mod queue;
pub mod runtime;

pub use core::CoreCoordinator;
pub use event_handlers::{CoreCommand, CoreStep};
pub use handle::{Aborter, RunHandle, start_run};
pub use queue::UnitQueue;
pub use runtime::Coordinator;
