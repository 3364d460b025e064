//! The `ExecutableNode` trait: the contract every node must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::NodeError;

/// Out-of-band output a node may stream while it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeEvent {
    /// A console line (log output of the node).
    Console { level: String, message: String },
    /// A screen frame, emitted by browser-automation style nodes.
    Screen { payload: Value },
}

/// A [`NodeEvent`] tagged with the step that produced it.
#[derive(Debug, Clone)]
pub struct NodeEventEnvelope {
    pub step_id: Uuid,
    pub node_id: String,
    pub event: NodeEvent,
}

pub type NodeEventSink = mpsc::UnboundedSender<NodeEventEnvelope>;

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// ID of the node being executed.
    pub node_id: String,
    /// ID of the `ExecutionStep` row for this node.
    pub step_id: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Node configuration with `{{ }}` placeholders already resolved.
    pub config: Value,
    /// Input supplied when the execution was triggered.
    pub trigger: Value,
    /// Workflow-level `global_variables`.
    pub variables: Value,
    /// Outputs of the direct predecessors that activated this node.
    pub predecessors: HashMap<String, Value>,
    /// Resolved credentials for the node's `credentials_id`.
    pub credentials: HashMap<String, String>,
    /// Where console/screen updates go; `None` outside a live run.
    pub events: Option<NodeEventSink>,
}

impl ExecutionContext {
    /// A bare context, mostly useful in tests.
    pub fn new(workflow_id: Uuid, execution_id: Uuid, node_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            execution_id,
            node_id: node_id.into(),
            step_id: Uuid::new_v4(),
            attempt: 1,
            config: Value::Null,
            trigger: Value::Null,
            variables: Value::Null,
            predecessors: HashMap::new(),
            credentials: HashMap::new(),
            events: None,
        }
    }

    /// Emit a console line to live viewers.
    pub fn console(&self, level: &str, message: impl Into<String>) {
        self.emit(NodeEvent::Console {
            level: level.to_owned(),
            message: message.into(),
        });
    }

    /// Emit a screen frame to live viewers.
    pub fn screen(&self, payload: Value) {
        self.emit(NodeEvent::Screen { payload });
    }

    fn emit(&self, event: NodeEvent) {
        if let Some(sink) = &self.events {
            // The receiver is gone once the run finished; nothing to do then.
            let _ = sink.send(NodeEventEnvelope {
                step_id: self.step_id,
                node_id: self.node_id.clone(),
                event,
            });
        }
    }
}

/// Broad grouping used by the node catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    Action,
    Logic,
    Integration,
    Utility,
}

/// Catalog entry describing a registered node kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Key the registry is indexed by (`node.data.type` or `integration_type`).
    pub node_type: String,
    pub label: String,
    pub category: NodeCategory,
    /// Set for integration nodes; the value of `data.integration_type`.
    pub integration_type: Option<String>,
    pub description: String,
    /// JSON schema of the node's `config`.
    pub config_schema: Value,
}

/// The core node trait.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Catalog metadata for this node kind.
    fn descriptor(&self) -> NodeDescriptor;

    /// Execute the node: receive the predecessors' JSON output as `input`,
    /// and return this node's JSON output.
    async fn execute(
        &self,
        input: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
