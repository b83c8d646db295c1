use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deploygraph::errors::{DeployError, Result};
use deploygraph::exec::{TaskExecutor, TaskInvocation, TaskOutcome};
use deploygraph::inventory::Inventory;

/// One call observed by [`FakeExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub task: String,
    pub target: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<Call>,
    running: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    running_total: usize,
    peak_total: usize,
}

/// A fake executor that:
/// - records every `(task, target)` it was asked to run
/// - tracks how many executions of each task overlap
/// - sleeps for a configurable delay (use paused time in tests)
/// - fails, hangs or panics on demand.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    state: Arc<Mutex<State>>,
    delay: Duration,
    fail_tasks: HashSet<String>,
    fail_targets: HashSet<(String, String)>,
    hang_tasks: HashSet<String>,
    panic_tasks: HashSet<String>,
}

/// Decrements the running counters even when the execution is dropped.
struct RunningGuard {
    state: Arc<Mutex<State>>,
    task: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.running_total -= 1;
        if let Some(n) = state.running.get_mut(&self.task) {
            *n -= 1;
        }
    }
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every execution takes `delay` before reporting.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `task` fails on every target.
    pub fn failing(mut self, task: &str) -> Self {
        self.fail_tasks.insert(task.to_string());
        self
    }

    /// `task` fails on `target` only.
    pub fn failing_on(mut self, task: &str, target: &str) -> Self {
        self.fail_targets
            .insert((task.to_string(), target.to_string()));
        self
    }

    /// `task` never returns.
    pub fn hanging(mut self, task: &str) -> Self {
        self.hang_tasks.insert(task.to_string());
        self
    }

    /// `task` panics inside `execute`.
    pub fn panicking(mut self, task: &str) -> Self {
        self.panic_tasks.insert(task.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Targets `task` was run on, in call order.
    pub fn targets_of(&self, task: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.task == task)
            .map(|c| c.target)
            .collect()
    }

    pub fn ran(&self, task: &str) -> bool {
        self.calls().iter().any(|c| c.task == task)
    }

    /// Highest number of overlapping executions of `task`.
    pub fn peak_concurrency(&self, task: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .peak
            .get(task)
            .copied()
            .unwrap_or(0)
    }

    pub fn peak_total(&self) -> usize {
        self.state.lock().unwrap().peak_total
    }

    pub fn running_total(&self) -> usize {
        self.state.lock().unwrap().running_total
    }

    fn begin(&self, task: &str, target: Option<&str>) -> RunningGuard {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            task: task.to_string(),
            target: target.map(str::to_string),
        });
        let running = state.running.entry(task.to_string()).or_default();
        *running += 1;
        let running = *running;
        let peak = state.peak.entry(task.to_string()).or_default();
        *peak = (*peak).max(running);
        state.running_total += 1;
        state.peak_total = state.peak_total.max(state.running_total);

        RunningGuard {
            state: Arc::clone(&self.state),
            task: task.to_string(),
        }
    }

    fn should_fail(&self, task: &str, target: Option<&str>) -> bool {
        self.fail_tasks.contains(task)
            || target.is_some_and(|t| {
                self.fail_targets
                    .contains(&(task.to_string(), t.to_string()))
            })
    }
}

impl TaskExecutor for FakeExecutor {
    fn execute<'a>(
        &'a self,
        invocation: &'a TaskInvocation,
        target: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'a>> {
        Box::pin(async move {
            let _guard = self.begin(&invocation.task, target);

            if self.panic_tasks.contains(&invocation.task) {
                panic!("executor bug in '{}'", invocation.task);
            }
            if self.hang_tasks.contains(&invocation.task) {
                std::future::pending::<()>().await;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.should_fail(&invocation.task, target) {
                TaskOutcome::Failed(format!(
                    "scripted failure of '{}' on {}",
                    invocation.task,
                    target.unwrap_or("local")
                ))
            } else {
                TaskOutcome::Success
            }
        })
    }
}

/// Inventory whose lookups always fail.
#[derive(Debug, Clone, Default)]
pub struct FailingInventory;

impl Inventory for FailingInventory {
    fn nodes_for_role<'a>(
        &'a self,
        _roles: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async {
            Err::<Vec<String>, _>(DeployError::ConfigError(
                "inventory backend unavailable".to_string(),
            ))
        })
    }
}

/// Inventory whose lookups panic.
#[derive(Debug, Clone, Default)]
pub struct PanickingInventory;

impl Inventory for PanickingInventory {
    fn nodes_for_role<'a>(
        &'a self,
        roles: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            if roles.is_empty() {
                return Ok(Vec::new());
            }
            panic!("inventory bug resolving {roles:?}");
        })
    }
}
