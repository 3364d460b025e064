//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{ExecutableNode, ExecutionContext, NodeCategory, NodeDescriptor};
use crate::NodeError;

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with the given error on every call.
    Fail(NodeError),
    /// Fail with `error` for the first `times` calls, then return `value`.
    FailTimes {
        times: usize,
        error: NodeError,
        value: Value,
    },
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Sleep before answering.
    pub delay: Option<Duration>,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Fail(NodeError::Fatal(msg.into())))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Fail(NodeError::Retryable(msg.into())))
    }

    /// Create a mock that always fails with `error`.
    pub fn failing_with(name: impl Into<String>, error: NodeError) -> Self {
        Self::with(name, MockBehaviour::Fail(error))
    }

    /// Create a mock that fails `times` times with a `Retryable` error and
    /// then succeeds with `value`.
    pub fn flaky(name: impl Into<String>, times: usize, value: Value) -> Self {
        Self::with(
            name,
            MockBehaviour::FailTimes {
                times,
                error: NodeError::Retryable("transient failure".into()),
                value,
            },
        )
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Inputs received so far.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn output(&self, v: &Value) -> Value {
        // Merge the node's own name into its output so tests can trace the
        // data flowing through the pipeline.
        let mut out = json!({ "node": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            node_type: "mock".into(),
            label: format!("Mock ({})", self.name),
            category: NodeCategory::Utility,
            integration_type: None,
            description: "Test double".into(),
            config_schema: json!({}),
        }
    }

    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(input);
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::Fail(err) => Err(err.clone()),
            MockBehaviour::FailTimes { times, error, value } => {
                if call_no <= *times {
                    Err(error.clone())
                } else {
                    Ok(self.output(value))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn flaky_node_recovers_after_n_failures() {
        let node = MockNode::flaky("b", 2, json!({ "ok": true }));
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "b");

        assert!(node.execute(json!({}), &ctx).await.is_err());
        assert!(node.execute(json!({}), &ctx).await.is_err());
        let out = node.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out, json!({ "node": "b", "ok": true }));
        assert_eq!(node.call_count(), 3);
    }
}
