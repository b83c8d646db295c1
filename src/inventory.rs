// src/inventory.rs

//! Node inventory collaborator.
//!
//! The coordinator asks an [`Inventory`] which concrete nodes a role set
//! maps to, once per group activation. The order of the returned nodes is
//! the order units are queued in, so implementations must be deterministic.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::config::InventorySection;
use crate::errors::Result;

/// Role to node resolution.
pub trait Inventory: Send + Sync {
    fn nodes_for_role<'a>(
        &'a self,
        roles: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;
}

/// Inventory backed by the `inventory` section of a definition file.
///
/// Resolution walks the requested roles in order and each role's nodes in
/// listed order, dropping nodes already seen. Role `*` expands to every
/// node, in role-name order.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    section: InventorySection,
}

impl StaticInventory {
    pub fn new(section: InventorySection) -> Self {
        Self { section }
    }

    /// Synchronous resolution, shared by the trait impl and dry runs.
    pub fn resolve(&self, roles: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |node: &String| {
            if !out.contains(node) {
                out.push(node.clone());
            }
        };

        for role in roles {
            if role == "*" {
                self.section.roles.values().flatten().for_each(&mut push);
            } else if let Some(nodes) = self.section.roles.get(role) {
                nodes.iter().for_each(&mut push);
            } else {
                debug!(role = %role, "role has no nodes in inventory");
            }
        }
        out
    }
}

impl Inventory for StaticInventory {
    fn nodes_for_role<'a>(
        &'a self,
        roles: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.resolve(roles)) })
    }
}
