// src/engine/handle.rs

//! Caller-facing surface of a run: start it, query it, abort it.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::dag::{DeploymentGraph, NodeStatus};
use crate::errors::Result;
use crate::exec::TaskExecutor;
use crate::inventory::Inventory;

use super::core::CoreCoordinator;
use super::runtime::Coordinator;
use super::{RunEvent, RunOptions, RunReport, RunSnapshot, RunStatus};

/// Cloneable abort trigger, usable from a signal handler.
#[derive(Debug, Clone)]
pub struct Aborter {
    tx: mpsc::Sender<RunEvent>,
}

impl Aborter {
    /// Ask the run to stop. A run that already finished ignores this.
    pub async fn abort(&self) {
        if self.tx.send(RunEvent::AbortRequested).await.is_err() {
            debug!("abort requested after the run finished");
        }
    }
}

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
    aborter: Aborter,
    status_rx: watch::Receiver<RunSnapshot>,
    join: JoinHandle<Result<RunReport>>,
}

/// Spawn a coordinator for `graph` and start it.
///
/// Must be called from within a Tokio runtime.
pub fn start_run(
    graph: Arc<DeploymentGraph>,
    executor: Arc<dyn TaskExecutor>,
    inventory: Arc<dyn Inventory>,
    options: RunOptions,
) -> RunHandle {
    let (tx, rx) = mpsc::channel::<RunEvent>(256);
    let core = CoreCoordinator::new(graph, options);
    let (status_tx, status_rx) = watch::channel(core.snapshot());

    // The channel is fresh, so Start is always the first event processed.
    if let Err(err) = tx.try_send(RunEvent::Start) {
        debug!(error = %err, "could not queue the start event");
    }

    let coordinator = Coordinator::new(core, rx, tx.clone(), executor, inventory, status_tx);
    let join = tokio::spawn(coordinator.run());

    RunHandle {
        aborter: Aborter { tx },
        status_rx,
        join,
    }
}

impl RunHandle {
    pub async fn abort(&self) {
        self.aborter.abort().await;
    }

    pub fn aborter(&self) -> Aborter {
        self.aborter.clone()
    }

    /// Coarse run status as of the last coordinator step.
    pub fn status(&self) -> RunStatus {
        self.status_rx.borrow().status
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.status_rx.borrow().node_status(id)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Wait for the run to end and return its report.
    pub async fn wait(self) -> Result<RunReport> {
        self.join
            .await
            .map_err(|err| anyhow!("coordinator task panicked or was cancelled: {err}"))?
    }
}
