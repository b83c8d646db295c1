// src/config/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

/// Top-level definition file as read from YAML or TOML.
///
/// ```yaml
/// config:
///   terminal_stage: deploy_end
/// inventory:
///   controller: [node-1, node-2]
/// node:
///   - id: deploy_start
///     type: stage
///   - id: controller
///     type: group
///     role: [controller]
///     requires: [deploy_start]
///     parameters:
///       strategy: { type: one_by_one }
/// ```
///
/// All sections except `node` are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Role name -> ordered list of node names.
    #[serde(default)]
    pub inventory: InventorySection,

    #[serde(default)]
    pub node: Vec<RawNode>,
}

/// Validated definition. Only constructible through
/// `ConfigFile::try_from(RawConfigFile)` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub inventory: InventorySection,
    pub node: Vec<RawNode>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        inventory: InventorySection,
        node: Vec<RawNode>,
    ) -> Self {
        Self {
            config,
            inventory,
            node,
        }
    }
}

/// `config` section: run-level behaviour.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigSection {
    /// Stage whose success defines a successful run (e.g. `deploy_end`).
    #[serde(default)]
    pub terminal_stage: Option<String>,

    /// Failed units a group may absorb and still succeed, unless the group
    /// overrides it with `parameters.fault_tolerance`.
    #[serde(default)]
    pub fault_tolerance: usize,

    /// Timeout in seconds for tasks that don't declare their own.
    #[serde(default)]
    pub default_timeout: Option<u64>,

    /// Abort the whole run on the first failure that isn't absorbed.
    #[serde(default)]
    pub fail_fast: bool,

    /// Command prefix used to reach a target node, e.g. `["ssh"]`.
    #[serde(default)]
    pub remote_shell: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct InventorySection {
    pub roles: BTreeMap<String, Vec<String>>,
}

/// One record of the declarative graph.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    pub id: String,

    /// `stage`, `group`, or a task kind (`puppet`, `shell`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, deserialize_with = "one_or_many")]
    pub role: Vec<String>,

    /// Groups a task belongs to; it then runs inside their per-node units.
    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub required_for: Vec<String>,

    #[serde(default)]
    pub parameters: RawParameters,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParameters {
    #[serde(default)]
    pub strategy: Option<RawStrategy>,

    #[serde(default)]
    pub fault_tolerance: Option<usize>,

    #[serde(default)]
    pub puppet_manifest: Option<String>,

    #[serde(default)]
    pub puppet_modules: Option<String>,

    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Everything else, passed through to the executor untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStrategy {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub amount: Option<i64>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    })
}
