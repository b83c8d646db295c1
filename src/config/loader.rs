// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{ConfigFile, RawConfigFile, RawNode};
use crate::errors::{DeployError, Result};

/// On-disk formats a definition can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Toml,
}

impl DefinitionFormat {
    /// Pick the format from a file extension (`.yaml`, `.yml`, `.toml`).
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(DefinitionFormat::Yaml),
            Some("toml") => Ok(DefinitionFormat::Toml),
            other => Err(DeployError::ConfigError(format!(
                "unsupported definition extension {:?} for {} (expected .yaml, .yml or .toml)",
                other,
                path.display()
            ))),
        }
    }
}

/// Load a definition file and return the raw `RawConfigFile`.
///
/// This only deserializes; it does **not** build or validate the graph.
/// Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let format = DefinitionFormat::from_path(path)?;
    let contents = fs::read_to_string(path)?;
    parse_definition(&contents, format)
}

/// Deserialize a definition from a string.
///
/// A YAML document that is a bare sequence is taken as the node list, with
/// a default `config` section and no inventory.
pub fn parse_definition(contents: &str, format: DefinitionFormat) -> Result<RawConfigFile> {
    match format {
        DefinitionFormat::Toml => Ok(toml::from_str(contents)?),
        DefinitionFormat::Yaml => {
            let value: serde_yaml::Value = serde_yaml::from_str(contents)?;
            if value.is_sequence() {
                let node: Vec<RawNode> = serde_yaml::from_value(value)?;
                Ok(RawConfigFile {
                    node,
                    ..RawConfigFile::default()
                })
            } else {
                Ok(serde_yaml::from_value(value)?)
            }
        }
    }
}

/// Load a definition and run full validation, including a trial graph
/// build (ids, references, strategies, cycles).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw = load_from_path(&path)?;
    ConfigFile::try_from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DefinitionFormat::from_path(Path::new("graph.yml")).unwrap(),
            DefinitionFormat::Yaml
        );
        assert_eq!(
            DefinitionFormat::from_path(Path::new("env/prod.toml")).unwrap(),
            DefinitionFormat::Toml
        );
        assert!(DefinitionFormat::from_path(Path::new("graph")).is_err());
    }

    #[test]
    fn bare_yaml_sequence_is_the_node_list() {
        let raw = parse_definition(
            "- id: deploy_start\n  type: stage\n- id: deploy_end\n  type: stage\n  requires: [deploy_start]\n",
            DefinitionFormat::Yaml,
        )
        .unwrap();
        assert_eq!(raw.node.len(), 2);
        assert_eq!(raw.node[1].requires, vec!["deploy_start"]);
        assert_eq!(raw.config.fault_tolerance, 0);
    }

    #[test]
    fn unknown_parameters_are_kept_for_the_executor() {
        let raw = parse_definition(
            "node:\n  - id: uptime-check\n    type: shell\n    parameters:\n      cmd: uptime\n      timeout: 5\n",
            DefinitionFormat::Yaml,
        )
        .unwrap();
        let params = &raw.node[0].parameters;
        assert_eq!(params.timeout, Some(5));
        assert_eq!(
            params.extra.get("cmd").and_then(|v| v.as_str()),
            Some("uptime")
        );
    }
}
