//! Type-indexed table of node implementations.
//!
//! The graph executor looks nodes up by `node.data.type`; nodes whose type
//! is `integration` are looked up by their `integration_type` instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::builtin;
use crate::traits::{ExecutableNode, NodeCategory, NodeDescriptor};

/// `data.type` value that defers dispatch to `data.integration_type`.
pub const INTEGRATION_NODE_TYPE: &str = "integration";

/// Maps node type keys to shared `ExecutableNode` implementations.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, Arc<dyn ExecutableNode>>,
    /// integration_type -> registry key
    integrations: BTreeMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with every built-in node kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register `node` under its descriptor's `node_type`, replacing any
    /// previous entry.
    pub fn register(&mut self, node: Arc<dyn ExecutableNode>) {
        let key = node.descriptor().node_type;
        self.register_as(key, node);
    }

    /// Register `node` under an explicit key.
    pub fn register_as(&mut self, key: impl Into<String>, node: Arc<dyn ExecutableNode>) {
        let key = key.into();
        if let Some(kind) = node.descriptor().integration_type {
            self.integrations.insert(kind, key.clone());
        }
        self.nodes.insert(key, node);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.nodes.get(key).cloned()
    }

    /// Resolve the implementation for a node's `data.type` and optional
    /// `data.integration_type`.
    pub fn resolve(
        &self,
        node_type: &str,
        integration_type: Option<&str>,
    ) -> Option<Arc<dyn ExecutableNode>> {
        match integration_type {
            Some(kind) if node_type == INTEGRATION_NODE_TYPE => self
                .integrations
                .get(kind)
                .and_then(|key| self.get(key))
                .or_else(|| self.get(kind)),
            _ => self.get(node_type),
        }
    }

    pub fn contains(&self, node_type: &str, integration_type: Option<&str>) -> bool {
        self.resolve(node_type, integration_type).is_some()
    }

    /// Catalog of every registered node, sorted by key.
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.nodes.values().map(|n| n.descriptor()).collect()
    }

    /// Catalog restricted to integration nodes.
    pub fn integrations(&self) -> Vec<NodeDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(|d| d.category == NodeCategory::Integration)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNode;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let registry = NodeRegistry::with_builtins();
        for key in ["trigger", "set", "condition", "delay", "log", "http_request", "error_handler"] {
            assert!(registry.get(key).is_some(), "missing builtin {key}");
        }
    }

    #[test]
    fn integration_nodes_resolve_by_integration_type() {
        let registry = NodeRegistry::with_builtins();
        assert!(registry.resolve("integration", Some("http")).is_some());
        assert!(registry.resolve("integration", Some("http_request")).is_some());
        assert!(registry.resolve("integration", Some("salesforce")).is_none());
        // Non-integration types ignore integration_type.
        assert!(registry.resolve("set", Some("salesforce")).is_some());
    }

    #[test]
    fn integrations_catalog_only_lists_integrations() {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_as("mock", Arc::new(MockNode::returning("m", json!({}))));
        let integrations = registry.integrations();
        assert!(!integrations.is_empty());
        assert!(integrations
            .iter()
            .all(|d| d.category == NodeCategory::Integration));
    }
}
