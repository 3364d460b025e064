//! Control-flow and data-shaping nodes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::traits::{ExecutableNode, ExecutionContext, NodeCategory, NodeDescriptor};
use crate::NodeError;

fn descriptor(
    node_type: &str,
    label: &str,
    category: NodeCategory,
    description: &str,
    config_schema: Value,
) -> NodeDescriptor {
    NodeDescriptor {
        node_type: node_type.into(),
        label: label.into(),
        category,
        integration_type: None,
        description: description.into(),
        config_schema,
    }
}

/// Entry node; forwards the trigger payload.
pub struct TriggerNode;

#[async_trait]
impl ExecutableNode for TriggerNode {
    fn descriptor(&self) -> NodeDescriptor {
        descriptor(
            "trigger",
            "Trigger",
            NodeCategory::Trigger,
            "Starts the workflow and emits the trigger payload",
            json!({ "type": "object" }),
        )
    }

    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        Ok(input)
    }
}

/// Merges `config.values` into the input object.
pub struct SetNode;

#[async_trait]
impl ExecutableNode for SetNode {
    fn descriptor(&self) -> NodeDescriptor {
        descriptor(
            "set",
            "Set Fields",
            NodeCategory::Action,
            "Adds or overwrites fields on the incoming data",
            json!({
                "type": "object",
                "properties": {
                    "values": { "type": "object" },
                    "keep_input": { "type": "boolean", "default": true }
                },
                "required": ["values"]
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let values = ctx
            .config
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| NodeError::Config("set: 'values' must be an object".into()))?;
        let keep_input = ctx
            .config
            .get("keep_input")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut out = match input {
            Value::Object(map) if keep_input => map,
            _ => Map::new(),
        };
        for (k, v) in values {
            out.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(out))
    }
}

/// Sleeps for `config.seconds` (or `config.milliseconds`), then forwards input.
pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    fn descriptor(&self) -> NodeDescriptor {
        descriptor(
            "delay",
            "Delay",
            NodeCategory::Utility,
            "Waits before passing data on",
            json!({
                "type": "object",
                "properties": {
                    "seconds": { "type": "number", "minimum": 0 },
                    "milliseconds": { "type": "integer", "minimum": 0 }
                }
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let delay = if let Some(ms) = ctx.config.get("milliseconds").and_then(Value::as_u64) {
            Duration::from_millis(ms)
        } else {
            let secs = ctx.config.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
            if !secs.is_finite() || secs < 0.0 {
                return Err(NodeError::Config(format!("delay: invalid seconds {secs}")));
            }
            Duration::from_secs_f64(secs)
        };
        tokio::time::sleep(delay).await;
        Ok(input)
    }
}

/// Writes `config.message` to the execution console.
pub struct LogNode;

#[async_trait]
impl ExecutableNode for LogNode {
    fn descriptor(&self) -> NodeDescriptor {
        descriptor(
            "log",
            "Log",
            NodeCategory::Utility,
            "Writes a message to the execution console",
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" },
                    "level": { "type": "string", "enum": ["debug", "info", "warn", "error"] }
                }
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let level = ctx.config.get("level").and_then(Value::as_str).unwrap_or("info");
        let message = match ctx.config.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => input.to_string(),
        };
        tracing::debug!(node_id = %ctx.node_id, level, "{message}");
        ctx.console(level, message);
        Ok(input)
    }
}

/// Receives the error detail of a failed node.
pub struct ErrorHandlerNode;

#[async_trait]
impl ExecutableNode for ErrorHandlerNode {
    fn descriptor(&self) -> NodeDescriptor {
        descriptor(
            "error_handler",
            "Error Handler",
            NodeCategory::Logic,
            "Target of error_handling.on_error = goto_error_handler",
            json!({
                "type": "object",
                "properties": { "message": { "type": "string" } }
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let failed_node = input
            .pointer("/error/node_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let message = ctx
            .config
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("handling failure of node '{failed_node}'"));
        ctx.console("error", message);
        Ok(json!({ "handled": true, "error": input.get("error").cloned().unwrap_or(Value::Null) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn ctx(config: Value) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "n1");
        ctx.config = config;
        ctx
    }

    #[tokio::test]
    async fn set_merges_values_over_input() {
        let out = SetNode
            .execute(json!({ "a": 1, "b": 1 }), &ctx(json!({ "values": { "b": 2, "c": 3 } })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "a": 1, "b": 2, "c": 3 }));
    }

    #[tokio::test]
    async fn set_without_values_is_a_config_error() {
        let err = SetNode.execute(json!({}), &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_waits_then_forwards() {
        let started = tokio::time::Instant::now();
        let out = DelayNode
            .execute(json!({ "x": 1 }), &ctx(json!({ "seconds": 2 })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "x": 1 }));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn log_emits_console_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut c = ctx(json!({ "message": "hi", "level": "warn" }));
        c.events = Some(tx);

        LogNode.execute(json!(null), &c).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.node_id, "n1");
        assert_eq!(
            envelope.event,
            crate::NodeEvent::Console { level: "warn".into(), message: "hi".into() }
        );
    }

    #[tokio::test]
    async fn error_handler_marks_error_handled() {
        let input = json!({ "error": { "node_id": "b", "message": "boom" } });
        let out = ErrorHandlerNode.execute(input, &ctx(json!({}))).await.unwrap();
        assert_eq!(out["handled"], true);
        assert_eq!(out["error"]["node_id"], "b");
    }
}
