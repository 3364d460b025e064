use async_trait::async_trait;
use serde_json::{json, Value};

use crate::condition::ConditionGroup;
use crate::traits::{ExecutableNode, ExecutionContext, NodeCategory, NodeDescriptor};
use crate::NodeError;

/// Evaluates a [`ConditionGroup`] against its input.
///
/// Outputs `{"result": bool, "data": <input>}`; outgoing edges with
/// `source_handle` `"true"` / `"false"` are gated on `result`.
pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            node_type: "condition".into(),
            label: "Condition".into(),
            category: NodeCategory::Logic,
            integration_type: None,
            description: "Routes data down the true or false branch".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "combinator": { "type": "string", "enum": ["all", "any"] },
                    "conditions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "field": { "type": "string" },
                                "operator": { "type": "string" },
                                "value": {}
                            },
                            "required": ["field", "operator"]
                        }
                    }
                },
                "required": ["conditions"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let group: ConditionGroup = serde_json::from_value(ctx.config.clone())
            .map_err(|e| NodeError::Config(format!("condition: {e}")))?;
        let result = group.evaluate(&input);
        Ok(json!({ "result": result, "data": input }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn evaluates_against_input() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "check");
        ctx.config = json!({
            "conditions": [ { "field": "amount", "operator": "gte", "value": 100 } ]
        });

        let out = ConditionNode.execute(json!({ "amount": 250 }), &ctx).await.unwrap();
        assert_eq!(out, json!({ "result": true, "data": { "amount": 250 } }));

        let out = ConditionNode.execute(json!({ "amount": 5 }), &ctx).await.unwrap();
        assert_eq!(out["result"], false);
    }

    #[tokio::test]
    async fn malformed_config_is_rejected() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4(), "check");
        ctx.config = json!({ "conditions": "nope" });
        let err = ConditionNode.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
