// src/exec/backend.rs

//! Pluggable task executor abstraction.
//!
//! The coordinator talks to a [`TaskExecutor`] for every task of every
//! unit. Production code uses [`super::ProcessExecutor`]; tests provide
//! executors that record calls, fail on demand or never return.
//!
//! Executors are expected to honour the invocation's timeout, but the
//! coordinator does not rely on it: each call is also wrapped in
//! `tokio::time::timeout` and dropped on expiry or cancellation. A panic
//! inside `execute` is caught and fails the step.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::dag::{NodeId, TaskParameters};
use crate::errors::FailureReason;

/// Everything an executor needs to run one task on one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInvocation {
    pub task: NodeId,
    /// Declared task kind (`puppet`, `shell`, ...).
    pub kind: String,
    pub params: TaskParameters,
    pub timeout: Option<Duration>,
}

/// Result reported by an executor for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failed(String),
}

impl TaskOutcome {
    pub fn into_result(self) -> Result<(), FailureReason> {
        match self {
            TaskOutcome::Success => Ok(()),
            TaskOutcome::Failed(reason) => Err(FailureReason::Executor(reason)),
        }
    }
}

/// Text of a panic payload caught with `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Performs the actual work of a task.
///
/// `target` is the inventory node the unit is bound to, or `None` for a
/// standalone task without roles (runs on the orchestrating host).
pub trait TaskExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        invocation: &'a TaskInvocation,
        target: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>>;
}
