// src/dag/node.rs

//! Typed node definitions.
//!
//! Raw records carry a loosely-typed `parameters` map; here each record is
//! validated once into a [`NodeSpec`] whose [`NodeKind`] holds exactly the
//! parameters its kind understands.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::config::RawNode;
use crate::dag::policy::Strategy;
use crate::errors::GraphError;

/// Canonical node identifier, as declared in the definition.
pub type NodeId = String;

/// Position of a node in declaration order. Stable for the life of a graph.
pub type NodeIdx = usize;

/// Validated node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    /// Roles this node's work applies to.
    pub roles: Vec<String>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Zero-work synchronisation barrier.
    Stage,
    Group(GroupSpec),
    Task(TaskSpec),
}

#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub strategy: Strategy,
    /// Per-group override of `config.fault_tolerance`.
    pub fault_tolerance: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Declared task kind (`puppet`, `shell`, ...).
    pub kind: String,
    /// Ids of the groups this task runs in. Empty for standalone tasks.
    pub groups: Vec<NodeId>,
    /// Fan-out strategy of a standalone task with roles.
    pub strategy: Option<Strategy>,
    pub params: TaskParameters,
}

/// Parameters handed to the executor for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskParameters {
    Puppet(PuppetParameters),
    Generic(GenericParameters),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PuppetParameters {
    pub manifest: String,
    pub modules: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenericParameters {
    pub timeout: Option<Duration>,
    pub values: BTreeMap<String, serde_yaml::Value>,
}

impl TaskParameters {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            TaskParameters::Puppet(p) => p.timeout,
            TaskParameters::Generic(g) => g.timeout,
        }
    }

    /// Look up a free-form parameter by key (generic tasks only).
    pub fn value(&self, key: &str) -> Option<&serde_yaml::Value> {
        match self {
            TaskParameters::Puppet(_) => None,
            TaskParameters::Generic(g) => g.values.get(key),
        }
    }
}

/// Coarse kind label used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KindLabel {
    Stage,
    Group,
    Task,
}

impl fmt::Display for KindLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindLabel::Stage => write!(f, "stage"),
            KindLabel::Group => write!(f, "group"),
            KindLabel::Task => write!(f, "task"),
        }
    }
}

/// Whether a declared task kind is a configuration-management (puppet) run.
pub fn is_puppet_kind(kind: &str) -> bool {
    matches!(kind, "puppet" | "puppet-task")
}

impl NodeSpec {
    pub fn label(&self) -> KindLabel {
        match self.kind {
            NodeKind::Stage => KindLabel::Stage,
            NodeKind::Group(_) => KindLabel::Group,
            NodeKind::Task(_) => KindLabel::Task,
        }
    }

    pub fn is_stage(&self) -> bool {
        matches!(self.kind, NodeKind::Stage)
    }

    pub fn as_group(&self) -> Option<&GroupSpec> {
        match &self.kind {
            NodeKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskSpec> {
        match &self.kind {
            NodeKind::Task(t) => Some(t),
            _ => None,
        }
    }

    /// A task that runs inside one or more groups rather than on its own.
    pub fn is_member_task(&self) -> bool {
        self.as_task().is_some_and(|t| !t.groups.is_empty())
    }

    /// Validate a raw record into a typed node.
    ///
    /// References (`requires`, `required_for`, `groups`) are checked by the
    /// graph builder, which knows every declared id.
    pub fn from_raw(raw: &RawNode) -> Result<Self, GraphError> {
        let malformed = |reason: &str| GraphError::MalformedNode {
            node: raw.id.clone(),
            reason: reason.to_string(),
        };

        if raw.id.trim().is_empty() {
            return Err(malformed("node id must not be empty"));
        }

        let timeout = match raw.parameters.timeout {
            Some(0) => return Err(malformed("timeout must be >= 1 second")),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        let strategy = raw
            .parameters
            .strategy
            .as_ref()
            .map(|s| Strategy::from_raw(&raw.id, s))
            .transpose()?;

        let kind = match raw.kind.trim() {
            "" => return Err(malformed("node type must not be empty")),
            "stage" => {
                if !raw.groups.is_empty() {
                    return Err(malformed("`groups` is only valid on tasks"));
                }
                NodeKind::Stage
            }
            "group" => {
                if raw.role.is_empty() {
                    return Err(malformed("a group must declare at least one role"));
                }
                if !raw.groups.is_empty() {
                    return Err(malformed("`groups` is only valid on tasks"));
                }
                NodeKind::Group(GroupSpec {
                    strategy: strategy.unwrap_or_default(),
                    fault_tolerance: raw.parameters.fault_tolerance,
                })
            }
            task_kind => {
                if strategy.is_some() && !raw.groups.is_empty() {
                    warn!(
                        node = %raw.id,
                        "strategy on a member task has no effect; the group's strategy applies"
                    );
                }

                let params = if is_puppet_kind(task_kind) {
                    let manifest = raw
                        .parameters
                        .puppet_manifest
                        .clone()
                        .ok_or_else(|| malformed("puppet tasks require `puppet_manifest`"))?;
                    TaskParameters::Puppet(PuppetParameters {
                        manifest,
                        modules: raw.parameters.puppet_modules.clone(),
                        timeout,
                    })
                } else {
                    TaskParameters::Generic(GenericParameters {
                        timeout,
                        values: raw.parameters.extra.clone(),
                    })
                };

                NodeKind::Task(TaskSpec {
                    kind: task_kind.to_string(),
                    groups: raw.groups.clone(),
                    strategy,
                    params,
                })
            }
        };

        Ok(NodeSpec {
            id: raw.id.clone(),
            roles: raw.role.clone(),
            kind,
        })
    }
}
