// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::backend::panic_message;
use crate::exec::{TaskExecutor, run_unit};
use crate::inventory::Inventory;

use super::core::CoreCoordinator;
use super::{CoreCommand, RunEvent, RunReport, RunSnapshot, UnitId, UnitSpec};

/// Handle to a spawned unit, kept so it can be cancelled.
#[derive(Debug)]
struct ActiveUnit {
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// Drives a [`CoreCoordinator`] in response to [`RunEvent`]s and performs
/// the side effects it asks for.
///
/// This is a pure IO shell: inventory lookups and units run as spawned
/// Tokio tasks that report back through `event_tx`, and every status change
/// is decided by the core.
pub struct Coordinator {
    core: CoreCoordinator,
    event_rx: mpsc::Receiver<RunEvent>,
    event_tx: mpsc::Sender<RunEvent>,
    executor: Arc<dyn TaskExecutor>,
    inventory: Arc<dyn Inventory>,
    active: HashMap<UnitId, ActiveUnit>,
    status_tx: watch::Sender<RunSnapshot>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("core", &self.core)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(
        core: CoreCoordinator,
        event_rx: mpsc::Receiver<RunEvent>,
        event_tx: mpsc::Sender<RunEvent>,
        executor: Arc<dyn TaskExecutor>,
        inventory: Arc<dyn Inventory>,
        status_tx: watch::Sender<RunSnapshot>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            executor,
            inventory,
            active: HashMap::new(),
            status_tx,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RunEvent`s from `event_rx`.
    /// - Feeds them into the core.
    /// - Executes the commands returned by the core.
    /// - Publishes a snapshot after every step.
    pub async fn run(mut self) -> Result<RunReport> {
        info!("coordinator started");

        loop {
            let Some(event) = self.event_rx.recv().await else {
                warn!("event channel closed before the run finished");
                break;
            };

            debug!(?event, "coordinator received event");

            if let RunEvent::UnitCompleted { unit, .. } = &event {
                self.active.remove(unit);
            }

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command);
            }

            self.status_tx.send_replace(self.core.snapshot());

            if !step.keep_running {
                info!("core reported the run finished; stopping coordinator");
                break;
            }
        }

        // Anything still registered was either cancelled or is orphaned.
        self.cancel_all();
        let report = self.core.report();
        self.status_tx.send_replace(self.core.snapshot());
        info!(status = %report.status(), "coordinator exiting");
        Ok(report)
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::ResolveMembers { node, roles } => self.resolve_members(node, roles),
            CoreCommand::DispatchUnits(units) => {
                for unit in units {
                    self.spawn_unit(unit);
                }
            }
            CoreCommand::CancelUnits => self.cancel_all(),
            CoreCommand::Finish(outcome) => {
                debug!(?outcome, "core issued Finish");
            }
        }
    }

    fn resolve_members(&self, node: usize, roles: Vec<String>) {
        let inventory = Arc::clone(&self.inventory);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = match AssertUnwindSafe(inventory.nodes_for_role(&roles))
                .catch_unwind()
                .await
            {
                Ok(found) => found.map_err(|err| err.to_string()),
                Err(payload) => Err(format!(
                    "inventory panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            if tx
                .send(RunEvent::MembersResolved { node, result })
                .await
                .is_err()
            {
                debug!(node, "run finished before members were resolved");
            }
        });
    }

    fn spawn_unit(&mut self, unit: UnitSpec) {
        let id = unit.id;
        debug!(unit = %unit.label(), "spawning unit");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            run_unit(unit, executor, tx, cancel_rx).await;
        });

        self.active.insert(
            id,
            ActiveUnit {
                cancel: Some(cancel_tx),
                handle,
            },
        );
    }

    fn cancel_all(&mut self) {
        if self.active.is_empty() {
            return;
        }
        info!(units = self.active.len(), "cancelling in-flight units");
        for (id, mut unit) in self.active.drain() {
            let delivered = unit
                .cancel
                .take()
                .map(|cancel| cancel.send(()).is_ok())
                .unwrap_or(false);
            if !delivered {
                debug!(?id, "unit did not take the cancel signal; aborting its task");
                unit.handle.abort();
            }
        }
    }
}
