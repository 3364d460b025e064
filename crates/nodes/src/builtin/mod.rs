//! Built-in node kinds shipped with every registry.

mod condition;
mod flow;
mod http;

use std::sync::Arc;

pub use condition::ConditionNode;
pub use flow::{DelayNode, ErrorHandlerNode, LogNode, SetNode, TriggerNode};
pub use http::HttpRequestNode;

use crate::NodeRegistry;

pub(crate) fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(TriggerNode));
    registry.register(Arc::new(SetNode));
    registry.register(Arc::new(ConditionNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(LogNode));
    registry.register(Arc::new(ErrorHandlerNode));
    registry.register(Arc::new(HttpRequestNode::new()));
}
