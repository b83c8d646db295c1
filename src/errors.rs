// src/errors.rs

//! Crate-wide error types.
//!
//! - [`GraphError`] covers construction errors: the run never starts.
//! - [`FailureReason`] is why a single unit (or node) ended `failed`; these
//!   are absorbed by the coordinator and never abort the process.
//! - [`DeployError`] is the crate-level error returned by loaders and the
//!   run entry points.

use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Fatal errors raised while building a deployment graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateId(String),

    #[error("node '{from}' references unknown node '{to}'")]
    DanglingReference { from: String, to: String },

    #[error("cycle detected in dependency graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("node '{node}' has a malformed strategy: {reason}")]
    MalformedStrategy { node: String, reason: String },

    #[error("node '{node}' is malformed: {reason}")]
    MalformedNode { node: String, reason: String },
}

/// Why a unit, task or node ended in the `failed` state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("executor failure: {0}")]
    Executor(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("aborted")]
    Aborted,

    #[error("inventory lookup failed: {0}")]
    Inventory(String),

    #[error("{failed} of {total} units failed (tolerance {tolerance})")]
    Units {
        failed: usize,
        total: usize,
        tolerance: usize,
    },
}

/// Reports carry the human-readable form.
impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DeployError>;
