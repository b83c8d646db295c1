// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod inventory;
pub mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::dag::{DeploymentGraph, NodeKind, plan_waves};
use crate::engine::{RunOptions, RunReport, RunStatus, start_run};
use crate::exec::ProcessExecutor;
use crate::inventory::StaticInventory;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - definition loading and validation
/// - graph build
/// - inventory and process executor
/// - the coordinator, with Ctrl-C mapped to an abort
/// - the final status table (stdout, and optionally a YAML report)
pub async fn run(args: CliArgs) -> Result<()> {
    let graph_path = PathBuf::from(&args.graph);
    let cfg = load_and_validate(&graph_path)
        .with_context(|| format!("loading graph definition '{}'", graph_path.display()))?;
    let graph = Arc::new(DeploymentGraph::build(&cfg.node)?);

    info!(
        nodes = graph.len(),
        dependencies = graph.dependency_count(),
        "graph definition loaded"
    );

    if args.dry_run {
        print_dry_run(&cfg, &graph);
        return Ok(());
    }

    let executor = Arc::new(ProcessExecutor::new(cfg.config.remote_shell.clone()));
    let inventory = Arc::new(StaticInventory::new(cfg.inventory.clone()));
    let options = RunOptions::from_config(&cfg.config);

    let handle = start_run(Arc::clone(&graph), executor, inventory, options);

    // Ctrl-C → abort the run.
    {
        let aborter = handle.aborter();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            aborter.abort().await;
        });
    }

    let report = handle.wait().await?;
    print_report(&report);

    if let Some(path) = &args.report {
        write_report(&report, Path::new(path))?;
    }

    match report.status() {
        RunStatus::Success => Ok(()),
        status => bail!("deployment finished with status '{status}'"),
    }
}

/// Print the validated definition and the waves a fully successful run
/// would go through.
fn print_dry_run(cfg: &ConfigFile, graph: &DeploymentGraph) {
    println!("deploygraph dry-run");
    if let Some(stage) = &cfg.config.terminal_stage {
        println!("  config.terminal_stage = {stage}");
    }
    println!("  config.fault_tolerance = {}", cfg.config.fault_tolerance);
    println!("  config.fail_fast = {}", cfg.config.fail_fast);
    println!();

    let inventory = StaticInventory::new(cfg.inventory.clone());

    for (n, wave) in plan_waves(graph).iter().enumerate() {
        println!("wave {}:", n + 1);
        for id in wave {
            let Some(node) = graph.node_by_id(id) else {
                continue;
            };
            match &node.kind {
                NodeKind::Stage => println!("  - {id} (stage)"),
                NodeKind::Group(group) => {
                    let targets = inventory.resolve(&node.roles);
                    println!("  - {id} (group, {}, {} nodes)", group.strategy, targets.len());
                    if let Some(idx) = graph.index_of(id) {
                        for &task in graph.pipeline(idx) {
                            println!("      task: {}", graph.node(task).id);
                        }
                    }
                }
                NodeKind::Task(task) => {
                    let strategy = task.strategy.unwrap_or_default();
                    if node.roles.is_empty() {
                        println!("  - {id} ({}, local)", task.kind);
                    } else {
                        let targets = inventory.resolve(&node.roles);
                        println!("  - {id} ({}, {strategy}, {} nodes)", task.kind, targets.len());
                    }
                }
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_report(report: &RunReport) {
    println!("run status: {}", report.status());
    for node in &report.nodes {
        match &node.reason {
            Some(reason) => println!(
                "  {:<32} {:<6} {:?} ({reason})",
                node.id,
                node.kind.to_string(),
                node.status
            ),
            None => println!(
                "  {:<32} {:<6} {:?}",
                node.id,
                node.kind.to_string(),
                node.status
            ),
        }
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let yaml = serde_yaml::to_string(report).context("serialising run report")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("writing run report to '{}'", path.display()))?;
    info!(path = %path.display(), "run report written");
    Ok(())
}
