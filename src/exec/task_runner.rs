// src/exec/task_runner.rs

//! Runs one unit: its pipeline of tasks against a single target.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::engine::{RunEvent, StepResult, UnitSpec};
use crate::errors::FailureReason;
use crate::exec::backend::panic_message;
use crate::exec::{TaskExecutor, TaskOutcome};

/// Run every step of `unit` in order and report a `UnitCompleted` event.
///
/// - The unit stops at its first failed step; later steps are not reported.
/// - Each step is bounded by its invocation timeout, if any. An expired
///   step is dropped (which kills any child process the executor spawned)
///   and fails with [`FailureReason::Timeout`].
/// - A panicking executor fails the step with [`FailureReason::Executor`].
/// - If the cancel channel fires, the in-flight step is dropped and **no**
///   event is sent; the coordinator has already closed the unit out.
pub async fn run_unit(
    unit: UnitSpec,
    executor: Arc<dyn TaskExecutor>,
    events: mpsc::Sender<RunEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let label = unit.label();
    info!(unit = %label, steps = unit.steps.len(), "unit started");

    let mut results = Vec::with_capacity(unit.steps.len());
    for step in &unit.steps {
        let call = AssertUnwindSafe(executor.execute(&step.invocation, unit.target.as_deref()))
            .catch_unwind();
        let bounded = async {
            match step.invocation.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(caught) => step_outcome(caught),
                    Err(_) => Err(FailureReason::Timeout(limit)),
                },
                None => step_outcome(call.await),
            }
        };

        let outcome = tokio::select! {
            outcome = bounded => outcome,
            cancel = &mut cancel_rx => {
                match cancel {
                    Ok(()) => info!(unit = %label, task = %step.invocation.task, "unit cancelled"),
                    Err(_) => debug!(unit = %label, "cancel channel closed; stopping unit"),
                }
                return;
            }
        };

        match &outcome {
            Ok(()) => debug!(unit = %label, task = %step.invocation.task, "step succeeded"),
            Err(reason) => warn!(unit = %label, task = %step.invocation.task, %reason, "step failed"),
        }

        let failed = outcome.is_err();
        results.push(StepResult {
            task: step.task,
            outcome,
        });
        if failed {
            break;
        }
    }

    if events
        .send(RunEvent::UnitCompleted {
            unit: unit.id,
            results,
        })
        .await
        .is_err()
    {
        error!(unit = %label, "coordinator went away before the unit reported");
    }
}

fn step_outcome(caught: std::thread::Result<TaskOutcome>) -> Result<(), FailureReason> {
    match caught {
        Ok(outcome) => outcome.into_result(),
        Err(payload) => Err(FailureReason::Executor(format!(
            "executor panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}
