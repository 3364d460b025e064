//! The `Store` trait: every persistence operation the engine and API need.
//!
//! Two implementations ship with the crate: [`crate::MemoryStore`] and
//! [`crate::PgStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ExecutionRow, ExecutionStepRow, Page, ScheduleRow, WebhookRow, WorkflowFilter, WorkflowRow,
    WorkflowVersionRow,
};
use crate::DbError;

#[async_trait]
pub trait Store: Send + Sync {
    // ------ workflows ------

    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError>;

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Newest first.
    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Page<WorkflowRow>, DbError>;

    /// Every workflow with the given `trigger_type` and `status`.
    async fn list_workflows_by_trigger(
        &self,
        trigger_type: &str,
        status: &str,
    ) -> Result<Vec<WorkflowRow>, DbError>;

    async fn update_workflow(&self, row: &WorkflowRow) -> Result<(), DbError>;

    /// Hard delete; cascades to versions, executions, schedule and webhook.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;

    /// Bump the aggregate execution counters.
    async fn record_workflow_outcome(&self, id: Uuid, succeeded: bool) -> Result<(), DbError>;

    async fn insert_workflow_version(&self, row: &WorkflowVersionRow) -> Result<(), DbError>;

    async fn get_workflow_version(
        &self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<WorkflowVersionRow, DbError>;

    // ------ executions ------

    async fn insert_execution(&self, row: &ExecutionRow) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError>;

    async fn update_execution(&self, row: &ExecutionRow) -> Result<(), DbError>;

    /// Move an execution from status `from` to `to` only if it is still in
    /// `from`. Returns whether this call made the move.
    async fn claim_execution(&self, id: Uuid, from: &str, to: &str) -> Result<bool, DbError>;

    /// Newest first.
    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ExecutionRow>, DbError>;

    async fn list_executions_by_status(&self, statuses: &[&str]) -> Result<Vec<ExecutionRow>, DbError>;

    /// Insert or replace a step, keyed by `step.id`.
    async fn upsert_step(&self, row: &ExecutionStepRow) -> Result<(), DbError>;

    /// Ordered by `step_order`.
    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError>;

    // ------ schedules ------

    /// Insert or replace, keyed by `workflow_id`.
    async fn upsert_schedule(&self, row: &ScheduleRow) -> Result<(), DbError>;

    async fn get_schedule(&self, workflow_id: Uuid) -> Result<ScheduleRow, DbError>;

    async fn delete_schedule(&self, workflow_id: Uuid) -> Result<(), DbError>;

    /// Enabled schedules whose `next_run_at <= now`.
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleRow>, DbError>;

    // ------ webhooks ------

    /// Insert or replace, keyed by `workflow_id`. A path already used by
    /// another workflow yields [`DbError::Conflict`].
    async fn upsert_webhook(&self, row: &WebhookRow) -> Result<(), DbError>;

    async fn get_webhook(&self, workflow_id: Uuid) -> Result<WebhookRow, DbError>;

    async fn get_webhook_by_path(&self, path: &str) -> Result<WebhookRow, DbError>;

    async fn delete_webhook(&self, workflow_id: Uuid) -> Result<(), DbError>;
}
