// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::DeploymentGraph;
use crate::errors::{DeployError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DeployError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.inventory, raw.node))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_nodes(cfg)?;
    validate_global_config(cfg)?;
    validate_inventory(cfg)?;
    let graph = DeploymentGraph::build(&cfg.node)?;
    validate_terminal_stage(cfg, &graph)?;
    Ok(())
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(DeployError::ConfigError(
            "definition must contain at least one node".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.default_timeout == Some(0) {
        return Err(DeployError::ConfigError(
            "config.default_timeout must be >= 1 second (got 0)".to_string(),
        ));
    }

    if let Some(shell) = &cfg.config.remote_shell {
        if shell.is_empty() || shell[0].trim().is_empty() {
            return Err(DeployError::ConfigError(
                "config.remote_shell must name a program".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_inventory(cfg: &RawConfigFile) -> Result<()> {
    for (role, nodes) in cfg.inventory.roles.iter() {
        if role == "*" {
            return Err(DeployError::ConfigError(
                "inventory role '*' is reserved (it means every node)".to_string(),
            ));
        }
        if let Some(bad) = nodes.iter().find(|n| n.trim().is_empty()) {
            return Err(DeployError::ConfigError(format!(
                "inventory role '{role}' contains an empty node name ({bad:?})"
            )));
        }
    }
    Ok(())
}

fn validate_terminal_stage(cfg: &RawConfigFile, graph: &DeploymentGraph) -> Result<()> {
    let Some(terminal) = cfg.config.terminal_stage.as_deref() else {
        return Ok(());
    };

    match graph.index_of(terminal) {
        None => Err(DeployError::ConfigError(format!(
            "config.terminal_stage '{terminal}' is not a node in the graph"
        ))),
        Some(idx) if !graph.is_schedulable(idx) => {
            Err(DeployError::ConfigError(format!(
                "config.terminal_stage '{terminal}' is a task inside a group"
            )))
        }
        Some(_) => Ok(()),
    }
}
