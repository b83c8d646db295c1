// src/dag/policy.rs

//! Per-group concurrency policy.
//!
//! A group (or a fanned-out standalone task) carries a [`Strategy`] from
//! `parameters.strategy`; [`limit_for`] turns it into the number of units
//! that may be in flight for that node at once. Limits are per node, never
//! global.

use std::fmt;
use std::num::NonZeroUsize;

use crate::config::RawStrategy;
use crate::dag::node::{NodeKind, NodeSpec};
use crate::errors::GraphError;

/// Declared execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Strictly one unit at a time, in assignment order.
    OneByOne,
    /// Up to `amount` units at once, or all of them when `amount` is absent.
    #[default]
    Unbounded,
    Parallel(NonZeroUsize),
}

impl Strategy {
    /// Parse `{type: one_by_one}` / `{type: parallel, amount: N}`.
    pub fn from_raw(node: &str, raw: &RawStrategy) -> Result<Self, GraphError> {
        let malformed = |reason: String| GraphError::MalformedStrategy {
            node: node.to_string(),
            reason,
        };

        match raw.kind.trim() {
            "one_by_one" => {
                if raw.amount.is_some() {
                    return Err(malformed(
                        "`amount` is only valid with type `parallel`".to_string(),
                    ));
                }
                Ok(Strategy::OneByOne)
            }
            "parallel" => match raw.amount {
                None => Ok(Strategy::Unbounded),
                Some(n) if n >= 1 => usize::try_from(n)
                    .ok()
                    .and_then(NonZeroUsize::new)
                    .map(Strategy::Parallel)
                    .ok_or_else(|| malformed(format!("amount {n} is out of range"))),
                Some(n) => Err(malformed(format!("amount must be >= 1 (got {n})"))),
            },
            other => Err(malformed(format!(
                "unknown strategy type '{other}' (expected \"one_by_one\" or \"parallel\")"
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::OneByOne => write!(f, "one_by_one"),
            Strategy::Unbounded => write!(f, "parallel"),
            Strategy::Parallel(n) => write!(f, "parallel(amount={n})"),
        }
    }
}

/// How many units of one node may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    Bounded(NonZeroUsize),
    Unbounded,
}

impl ConcurrencyLimit {
    /// Whether another unit may start while `in_flight` are outstanding.
    pub fn allows(&self, in_flight: usize) -> bool {
        match self {
            ConcurrencyLimit::Bounded(n) => in_flight < n.get(),
            ConcurrencyLimit::Unbounded => true,
        }
    }
}

impl From<Strategy> for ConcurrencyLimit {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::OneByOne => ConcurrencyLimit::Bounded(NonZeroUsize::MIN),
            Strategy::Parallel(n) => ConcurrencyLimit::Bounded(n),
            Strategy::Unbounded => ConcurrencyLimit::Unbounded,
        }
    }
}

/// Concurrency limit applied when `node` becomes runnable.
///
/// Stages never dispatch units; they report `Unbounded`.
pub fn limit_for(node: &NodeSpec) -> ConcurrencyLimit {
    match &node.kind {
        NodeKind::Stage => ConcurrencyLimit::Unbounded,
        NodeKind::Group(group) => group.strategy.into(),
        NodeKind::Task(task) => task.strategy.unwrap_or_default().into(),
    }
}
