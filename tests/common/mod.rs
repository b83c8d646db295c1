#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use deploygraph::config::{ConfigFile, load_and_validate};
use deploygraph::dag::DeploymentGraph;
use deploygraph::engine::RunOptions;
use deploygraph::inventory::StaticInventory;

/// Path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The multi-role deployment used across the coordinator tests.
pub struct Fixture {
    pub cfg: ConfigFile,
    pub graph: Arc<DeploymentGraph>,
    pub inventory: Arc<StaticInventory>,
    pub options: RunOptions,
}

pub fn deployment_fixture() -> Fixture {
    let cfg = load_and_validate(fixture_path("deployment_graph.yaml"))
        .expect("fixture should load and validate");
    let graph = Arc::new(DeploymentGraph::build(&cfg.node).expect("fixture graph should build"));
    let inventory = Arc::new(StaticInventory::new(cfg.inventory.clone()));
    let options = RunOptions::from_config(&cfg.config);
    Fixture {
        cfg,
        graph,
        inventory,
        options,
    }
}
