// tests/coordinator_timeouts_and_abort.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use deploygraph::dag::NodeStatus;
use deploygraph::engine::{RunOptions, RunOutcome, RunStatus, start_run};
use deploygraph::errors::FailureReason;
use deploygraph_test_utils::builders::{GraphBuilder, NodeBuilder};
use deploygraph_test_utils::fake_executor::{FailingInventory, FakeExecutor, PanickingInventory};
use deploygraph_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// deploy_start -> controller{puppet task} -> deploy_end
fn single_group(timeout: Option<u64>) -> GraphBuilder {
    let mut task = NodeBuilder::puppet("netconfig", "/etc/puppet/netconfig.pp").in_group("controller");
    if let Some(secs) = timeout {
        task = task.timeout(secs);
    }
    GraphBuilder::new()
        .node(NodeBuilder::stage("deploy_start"))
        .node(NodeBuilder::group("controller").requires(&["deploy_start"]))
        .node(task)
        .node(NodeBuilder::stage("deploy_end").requires(&["controller"]))
        .hosts("controller", 1)
        .terminal_stage("deploy_end")
}

fn options(terminal: &str) -> RunOptions {
    RunOptions {
        terminal_stage: Some(terminal.to_string()),
        ..RunOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn hung_puppet_task_is_failed_by_its_timeout() -> TestResult {
    init_tracing();
    let builder = single_group(Some(1));
    let exec = Arc::new(FakeExecutor::new().hanging("netconfig"));

    let started = Instant::now();
    let report = start_run(
        builder.graph(),
        exec.clone(),
        builder.inventory(),
        options("deploy_end"),
    )
    .wait()
    .await?;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "finished after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "finished after {elapsed:?}");

    assert_eq!(report.status(), RunStatus::Failure);
    let timed_out = Some(FailureReason::Timeout(Duration::from_secs(1)));
    assert_eq!(report.node_status("netconfig"), Some(NodeStatus::Failed));
    assert_eq!(report.node("netconfig").and_then(|n| n.reason.clone()), timed_out);
    assert_eq!(report.node("controller").and_then(|n| n.reason.clone()), timed_out);
    assert_eq!(report.node_status("deploy_end"), Some(NodeStatus::Skipped));

    // The hung execution was dropped, not left running.
    assert_eq!(exec.running_total(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn config_default_timeout_applies_to_tasks_without_one() -> TestResult {
    init_tracing();
    let builder = single_group(None);
    let exec = Arc::new(FakeExecutor::new().hanging("netconfig"));
    let opts = RunOptions {
        default_timeout: Some(Duration::from_secs(30)),
        ..options("deploy_end")
    };

    let report = start_run(builder.graph(), exec, builder.inventory(), opts)
        .wait()
        .await?;

    assert_eq!(
        report.node("netconfig").and_then(|n| n.reason.clone()),
        Some(FailureReason::Timeout(Duration::from_secs(30)))
    );
    Ok(())
}

#[tokio::test]
async fn abort_cancels_in_flight_units_and_reports_them() -> TestResult {
    init_tracing();
    let builder = single_group(None).hosts("controller", 3);
    let exec = Arc::new(FakeExecutor::new().hanging("netconfig"));

    let handle = start_run(
        builder.graph(),
        exec.clone(),
        builder.inventory(),
        options("deploy_end"),
    );

    with_timeout(async {
        while exec.running_total() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(handle.status(), RunStatus::Running);
    assert_eq!(handle.node_status("controller"), Some(NodeStatus::Running));

    handle.abort().await;
    let report = with_timeout(handle.wait()).await?;

    match &report.outcome {
        RunOutcome::Aborted { outstanding_units } => {
            assert_eq!(outstanding_units.len(), 3);
            assert!(outstanding_units.iter().all(|u| u.starts_with("controller#")));
        }
        other => panic!("expected aborted, got {other:?}"),
    }
    assert_eq!(report.node_status("controller"), Some(NodeStatus::Failed));
    assert_eq!(
        report.node("controller").and_then(|n| n.reason.clone()),
        Some(FailureReason::Aborted)
    );
    assert_eq!(report.node_status("deploy_end"), Some(NodeStatus::Skipped));
    assert_eq!(report.node_status("deploy_start"), Some(NodeStatus::Succeeded));

    // Cancelled executions are dropped shortly after.
    with_timeout(async {
        while exec.running_total() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn aborter_clone_can_stop_the_run_and_status_reflects_it() -> TestResult {
    init_tracing();
    let builder = single_group(None);
    let exec = Arc::new(FakeExecutor::new().hanging("netconfig"));
    let handle = start_run(
        builder.graph(),
        exec.clone(),
        builder.inventory(),
        options("deploy_end"),
    );
    let aborter = handle.aborter();

    with_timeout(async {
        while handle.node_status("netconfig") != Some(NodeStatus::Running) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    aborter.abort().await;
    with_timeout(async {
        while handle.status() == RunStatus::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert_eq!(handle.status(), RunStatus::Aborted);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.node_status("netconfig"), Some(NodeStatus::Failed));

    let report = with_timeout(handle.wait()).await?;
    assert_eq!(report.status(), RunStatus::Aborted);

    // Aborting a finished run is a no-op.
    aborter.abort().await;
    Ok(())
}

#[tokio::test]
async fn inventory_failure_fails_the_group() -> TestResult {
    init_tracing();
    let builder = single_group(None);
    let exec = Arc::new(FakeExecutor::new());

    let report = with_timeout(
        start_run(
            builder.graph(),
            exec.clone(),
            Arc::new(FailingInventory),
            options("deploy_end"),
        )
        .wait(),
    )
    .await?;

    assert_eq!(report.status(), RunStatus::Failure);
    match report.node("controller").and_then(|n| n.reason.clone()) {
        Some(FailureReason::Inventory(msg)) => assert!(msg.contains("unavailable")),
        other => panic!("expected inventory failure, got {other:?}"),
    }
    assert_eq!(report.node_status("netconfig"), Some(NodeStatus::Skipped));
    assert!(exec.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn panicking_executor_fails_its_unit_instead_of_hanging_the_run() -> TestResult {
    init_tracing();
    let builder = single_group(None);
    let exec = Arc::new(FakeExecutor::new().panicking("netconfig"));

    let report = with_timeout(
        start_run(
            builder.graph(),
            exec.clone(),
            builder.inventory(),
            options("deploy_end"),
        )
        .wait(),
    )
    .await?;

    assert_eq!(report.status(), RunStatus::Failure);
    assert_eq!(report.node_status("controller"), Some(NodeStatus::Failed));
    assert_eq!(report.node_status("deploy_end"), Some(NodeStatus::Skipped));
    match report.node("netconfig").and_then(|n| n.reason.clone()) {
        Some(FailureReason::Executor(msg)) => {
            assert!(msg.contains("panicked"), "{msg}");
            assert!(msg.contains("executor bug"), "{msg}");
        }
        other => panic!("expected executor failure, got {other:?}"),
    }
    assert_eq!(exec.running_total(), 0);
    Ok(())
}

#[tokio::test]
async fn panicking_inventory_fails_the_group() -> TestResult {
    init_tracing();
    let builder = single_group(None);
    let exec = Arc::new(FakeExecutor::new());

    let report = with_timeout(
        start_run(
            builder.graph(),
            exec.clone(),
            Arc::new(PanickingInventory),
            options("deploy_end"),
        )
        .wait(),
    )
    .await?;

    assert_eq!(report.status(), RunStatus::Failure);
    match report.node("controller").and_then(|n| n.reason.clone()) {
        Some(FailureReason::Inventory(msg)) => assert!(msg.contains("panicked"), "{msg}"),
        other => panic!("expected inventory failure, got {other:?}"),
    }
    assert!(exec.calls().is_empty());
    Ok(())
}
