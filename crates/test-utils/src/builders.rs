#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use deploygraph::config::{
    ConfigFile, ConfigSection, InventorySection, RawConfigFile, RawNode, RawParameters,
    RawStrategy,
};
use deploygraph::dag::DeploymentGraph;
use deploygraph::errors::GraphError;
use deploygraph::inventory::StaticInventory;

/// Builder for a single `RawNode`.
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    node: RawNode,
}

impl NodeBuilder {
    fn new(id: &str, kind: &str) -> Self {
        Self {
            node: RawNode {
                id: id.to_string(),
                kind: kind.to_string(),
                role: Vec::new(),
                groups: Vec::new(),
                requires: Vec::new(),
                required_for: Vec::new(),
                parameters: RawParameters::default(),
            },
        }
    }

    pub fn stage(id: &str) -> Self {
        Self::new(id, "stage")
    }

    /// A group whose role has the same name as the group.
    pub fn group(id: &str) -> Self {
        Self::new(id, "group").role(id)
    }

    /// A shell task; `cmd` is only read by the process executor.
    pub fn task(id: &str) -> Self {
        Self::new(id, "shell").param("cmd", "true")
    }

    pub fn puppet(id: &str, manifest: &str) -> Self {
        let mut b = Self::new(id, "puppet");
        b.node.parameters.puppet_manifest = Some(manifest.to_string());
        b
    }

    pub fn role(mut self, role: &str) -> Self {
        self.node.role.push(role.to_string());
        self
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.node.groups.push(group.to_string());
        self
    }

    pub fn requires(mut self, ids: &[&str]) -> Self {
        self.node.requires.extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn required_for(mut self, ids: &[&str]) -> Self {
        self.node
            .required_for
            .extend(ids.iter().map(|s| s.to_string()));
        self
    }

    pub fn one_by_one(mut self) -> Self {
        self.node.parameters.strategy = Some(RawStrategy {
            kind: "one_by_one".to_string(),
            amount: None,
        });
        self
    }

    pub fn parallel(mut self, amount: Option<i64>) -> Self {
        self.node.parameters.strategy = Some(RawStrategy {
            kind: "parallel".to_string(),
            amount,
        });
        self
    }

    pub fn fault_tolerance(mut self, n: usize) -> Self {
        self.node.parameters.fault_tolerance = Some(n);
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.node.parameters.timeout = Some(secs);
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.node.parameters.extra.insert(
            key.to_string(),
            serde_yaml::Value::String(value.to_string()),
        );
        self
    }

    pub fn build(self) -> RawNode {
        self.node
    }
}

/// Builder for a whole definition: config, inventory and nodes.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    raw: RawConfigFile,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, node: NodeBuilder) -> Self {
        self.raw.node.push(node.build());
        self
    }

    pub fn nodes(mut self, nodes: impl IntoIterator<Item = NodeBuilder>) -> Self {
        self.raw.node.extend(nodes.into_iter().map(NodeBuilder::build));
        self
    }

    /// Assign `count` nodes named `{role}-{i}` to `role`.
    pub fn hosts(mut self, role: &str, count: usize) -> Self {
        let hosts = (1..=count).map(|i| format!("{role}-{i}")).collect();
        self.raw.inventory.roles.insert(role.to_string(), hosts);
        self
    }

    pub fn role_nodes(mut self, role: &str, nodes: &[&str]) -> Self {
        self.raw.inventory.roles.insert(
            role.to_string(),
            nodes.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn terminal_stage(mut self, id: &str) -> Self {
        self.raw.config.terminal_stage = Some(id.to_string());
        self
    }

    pub fn fail_fast(mut self) -> Self {
        self.raw.config.fail_fast = true;
        self
    }

    pub fn config(mut self, config: ConfigSection) -> Self {
        self.raw.config = config;
        self
    }

    pub fn raw(&self) -> &RawConfigFile {
        &self.raw
    }

    pub fn raw_nodes(&self) -> Vec<RawNode> {
        self.raw.node.clone()
    }

    pub fn inventory(&self) -> Arc<StaticInventory> {
        Arc::new(StaticInventory::new(self.raw.inventory.clone()))
    }

    pub fn inventory_section(&self) -> InventorySection {
        self.raw.inventory.clone()
    }

    pub fn try_graph(&self) -> Result<DeploymentGraph, GraphError> {
        DeploymentGraph::build(&self.raw.node)
    }

    pub fn graph(&self) -> Arc<DeploymentGraph> {
        Arc::new(self.try_graph().expect("Failed to build graph from builder"))
    }

    pub fn config_file(self) -> ConfigFile {
        ConfigFile::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

/// Inventory map from `(role, nodes)` pairs.
pub fn inventory(roles: &[(&str, &[&str])]) -> StaticInventory {
    let roles: BTreeMap<String, Vec<String>> = roles
        .iter()
        .map(|(role, nodes)| {
            (
                role.to_string(),
                nodes.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect();
    StaticInventory::new(InventorySection { roles })
}
