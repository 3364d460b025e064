//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow graph looks like
//! in memory. They serialise to and from the JSONB `definition` column of
//! the `workflows` and `workflow_versions` tables.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use nodes::condition::ConditionGroup;
use nodes::registry::INTEGRATION_NODE_TYPE;

use crate::EngineError;

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Behavioural part of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub label: String,
    /// Registry key; `integration` defers to `integration_type`.
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_type: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    /// Overrides the workflow-level retry policy for this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Upper bound for a single attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique within the workflow; referenced by edges and execution steps.
    pub id: String,
    /// Editor-level node kind (e.g. `action`, `trigger`).
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
}

impl WorkflowNode {
    /// The key used for registry dispatch: `data.type`, falling back to the
    /// editor-level `type`.
    pub fn node_type(&self) -> &str {
        if self.data.node_type.is_empty() {
            &self.kind
        } else {
            &self.data.node_type
        }
    }

    pub fn integration_type(&self) -> Option<&str> {
        self.data.integration_type.as_deref()
    }

    /// Human label used for execution steps.
    pub fn name(&self) -> &str {
        if self.data.label.is_empty() {
            &self.id
        } else {
            &self.data.label
        }
    }

    pub fn is_trigger(&self) -> bool {
        self.node_type() == "trigger" || self.kind == "trigger"
    }

    /// Type recorded on execution steps (`integration:<kind>` for integrations).
    pub fn step_type(&self) -> String {
        match self.integration_type() {
            Some(kind) if self.node_type() == INTEGRATION_NODE_TYPE => format!("integration:{kind}"),
            _ => self.node_type().to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// Evaluated against the source node's output; `false` gates the edge off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// `"true"` / `"false"` on condition nodes, `"error"` for failure routes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    #[serde(default)]
    pub animated: bool,
    #[serde(default)]
    pub data: EdgeData,
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Per-node retry policy. See [`crate::retry`] for the arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    /// Each delay is the previous one times this factor.
    pub backoff_multiplier: f64,
    /// Error types eligible for retry; empty means all.
    pub retry_on_error_types: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_seconds: 1.0,
            backoff_multiplier: 2.0,
            retry_on_error_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Stop,
    Continue,
    GotoErrorHandler,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandling {
    pub on_error: OnError,
    pub error_handler_node_id: Option<String>,
    pub notify_on_failure: bool,
    pub notification_channel: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, zoom: 1.0 }
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// The graph plus its run-time policies, stored as `definition`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowDefinition {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub viewport: Viewport,
    pub global_variables: Map<String, Value>,
    /// Bound on the whole run.
    pub timeout_seconds: Option<f64>,
    /// Default for nodes without their own policy.
    pub retry_policy: RetryPolicy,
    pub error_handling: ErrorHandling,
}

impl WorkflowDefinition {
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        serde_json::from_value(value.clone()).map_err(|e| EngineError::InvalidDefinition(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, EngineError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The node-level policy when set, otherwise the workflow default.
    pub fn retry_policy_for(&self, node: &WorkflowNode) -> RetryPolicy {
        node.data
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.retry_policy.clone())
    }
}

// ---------------------------------------------------------------------------
// Trigger configuration
// ---------------------------------------------------------------------------

/// Contents of `workflow.trigger_config`. Only event routing reads it; the
/// schedule and webhook rows carry their own settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub event_type: Option<String>,
    pub event_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerConfig {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_type.as_deref() == Some(event_type)
            || self.event_types.iter().any(|t| t == event_type)
    }
}

// ---------------------------------------------------------------------------
// PinnedWorkflow
// ---------------------------------------------------------------------------

/// A workflow frozen at one version; what the executor runs.
#[derive(Debug, Clone)]
pub struct PinnedWorkflow {
    pub id: Uuid,
    pub version: i32,
    pub name: String,
    pub definition: WorkflowDefinition,
}

impl PinnedWorkflow {
    pub fn from_version(row: &db::models::WorkflowVersionRow) -> Result<Self, EngineError> {
        Ok(Self {
            id: row.workflow_id,
            version: row.version,
            name: row.name.clone(),
            definition: WorkflowDefinition::from_value(&row.definition)?,
        })
    }

    /// Convenience constructor for tests.
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: 1,
            name: name.into(),
            definition,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn definition_parses_editor_payload() {
        let def = WorkflowDefinition::from_value(&json!({
            "nodes": [
                {"id": "t", "type": "trigger", "position": {"x": 0, "y": 0},
                 "data": {"label": "Start", "type": "trigger"}},
                {"id": "h", "type": "action", "position": {"x": 10, "y": 0},
                 "data": {"label": "Call", "type": "integration", "integration_type": "http",
                          "config": {"url": "https://example.com"},
                          "retry_policy": {"max_retries": 2}}}
            ],
            "edges": [
                {"id": "e1", "source": "t", "target": "h", "source_handle": "true",
                 "data": {"condition": {"conditions": [{"field": "ok", "operator": "truthy"}]}}}
            ],
            "error_handling": {"on_error": "goto_error_handler", "error_handler_node_id": "h"}
        }))
        .unwrap();

        assert_eq!(def.nodes.len(), 2);
        assert!(def.nodes[0].is_trigger());
        assert_eq!(def.nodes[1].step_type(), "integration:http");
        assert_eq!(def.retry_policy_for(&def.nodes[1]).max_retries, 2);
        assert_eq!(def.retry_policy_for(&def.nodes[1]).backoff_multiplier, 2.0);
        assert_eq!(def.retry_policy_for(&def.nodes[0]).max_retries, 0);
        assert!(def.edges[0].data.condition.is_some());
        assert_eq!(def.error_handling.on_error, OnError::GotoErrorHandler);
        assert_eq!(def.viewport.zoom, 1.0);
    }

    #[test]
    fn node_name_falls_back_to_id() {
        let node: WorkflowNode = serde_json::from_value(json!({"id": "n1", "data": {"type": "log"}})).unwrap();
        assert_eq!(node.name(), "n1");
        assert_eq!(node.node_type(), "log");
    }

    #[test]
    fn trigger_config_matches_event_types() {
        let cfg: TriggerConfig =
            serde_json::from_value(json!({"event_type": "order.created", "event_types": ["order.paid"]})).unwrap();
        assert!(cfg.subscribes_to("order.created"));
        assert!(cfg.subscribes_to("order.paid"));
        assert!(!cfg.subscribes_to("order.refunded"));
    }
}
