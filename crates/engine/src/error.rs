//! Engine-level error types.

use thiserror::Error;

use crate::webhook::WebhookRejection;

/// Errors produced by the workflow engine (validation, triggering, tracking).
///
/// Node failures are not errors at this level: they are recorded on the
/// execution and its steps.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// `error_handling.error_handler_node_id` names a node that doesn't exist.
    #[error("error handler node '{0}' does not exist")]
    UnknownErrorHandler(String),

    /// No implementation is registered for a node's type.
    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// The stored definition could not be decoded.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    /// Any other rejected input.
    #[error("{0}")]
    Validation(String),

    // ------ State errors ------

    #[error("{0} not found")]
    NotFound(String),

    /// The request is valid but conflicts with the current state
    /// (e.g. retrying a running execution).
    #[error("{0}")]
    InvalidState(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    /// An inbound webhook call was refused before any execution was created.
    #[error("webhook rejected: {0}")]
    Webhook(#[from] WebhookRejection),

    // ------ Infrastructure ------

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Map `DbError::NotFound` to a typed not-found error naming `what`.
    pub(crate) fn lookup(what: impl Into<String>) -> impl FnOnce(db::DbError) -> EngineError {
        let what = what.into();
        move |err| match err {
            db::DbError::NotFound => EngineError::NotFound(what),
            other => EngineError::Database(other),
        }
    }
}
