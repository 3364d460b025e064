//! Failure notifications.
//!
//! The delivery channel is an external collaborator; the engine only calls
//! [`Notifier::notify_failure`] for failed runs of workflows that set
//! `error_handling.notify_on_failure`.

use async_trait::async_trait;
use tracing::warn;

use db::models::ExecutionRow;

/// Delivers failure alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// `channel` is `error_handling.notification_channel`, if set.
    async fn notify_failure(&self, channel: Option<&str>, workflow_name: &str, execution: &ExecutionRow);
}

/// Writes failure alerts to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_failure(&self, channel: Option<&str>, workflow_name: &str, execution: &ExecutionRow) {
        warn!(
            channel = channel.unwrap_or("default"),
            workflow = workflow_name,
            execution_id = %execution.id,
            human_id = %execution.human_id,
            error = execution.error_message.as_deref().unwrap_or("unknown error"),
            "workflow execution failed"
        );
    }
}
