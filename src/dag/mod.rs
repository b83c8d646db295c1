// src/dag/mod.rs

//! Deployment graph model and readiness.
//!
//! - [`node`] validates raw records into typed nodes.
//! - [`graph`] holds the immutable graph: merged dependency edges, the
//!   lifted schedule over stages/groups/standalone tasks, group pipelines.
//! - [`policy`] maps a node's strategy to a concurrency limit.
//! - [`status`] is the per-run status table (forward-only transitions).
//! - [`solver`] decides which nodes are ready and which must be skipped.

pub mod graph;
pub mod node;
pub mod policy;
pub mod solver;
pub mod status;

pub use graph::DeploymentGraph;
pub use node::{KindLabel, NodeId, NodeIdx, NodeKind, NodeSpec, TaskParameters, is_puppet_kind};
pub use policy::{ConcurrencyLimit, Strategy, limit_for};
pub use solver::{SolverStep, TopologySolver, plan_waves};
pub use status::{NodeState, NodeStatus, StatusTable};
