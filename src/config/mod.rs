// src/config/mod.rs

//! Loading of declarative deployment graph definitions.
//!
//! Responsibilities:
//! - Define the serde-backed data model (`model.rs`).
//! - Load a definition file from disk, YAML or TOML (`loader.rs`).
//! - Validate it before any run can start (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DefinitionFormat, load_and_validate, load_from_path, parse_definition};
pub use model::{
    ConfigFile, ConfigSection, InventorySection, RawConfigFile, RawNode, RawParameters,
    RawStrategy,
};
