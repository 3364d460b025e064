//! Postgres-backed [`Store`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ExecutionRow, ExecutionStepRow, Page, ScheduleRow, WebhookRow, WorkflowFilter, WorkflowRow,
    WorkflowVersionRow,
};
use crate::repository::{executions, schedules, webhooks, workflows};
use crate::{DbError, DbPool, Store};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        workflows::insert_workflow(&self.pool, row).await
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        workflows::get_workflow(&self.pool, id).await
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Page<WorkflowRow>, DbError> {
        workflows::list_workflows(&self.pool, filter).await
    }

    async fn list_workflows_by_trigger(
        &self,
        trigger_type: &str,
        status: &str,
    ) -> Result<Vec<WorkflowRow>, DbError> {
        workflows::list_workflows_by_trigger(&self.pool, trigger_type, status).await
    }

    async fn update_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        workflows::update_workflow(&self.pool, row).await
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        workflows::delete_workflow(&self.pool, id).await
    }

    async fn record_workflow_outcome(&self, id: Uuid, succeeded: bool) -> Result<(), DbError> {
        workflows::record_outcome(&self.pool, id, succeeded).await
    }

    async fn insert_workflow_version(&self, row: &WorkflowVersionRow) -> Result<(), DbError> {
        workflows::insert_version(&self.pool, row).await
    }

    async fn get_workflow_version(
        &self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<WorkflowVersionRow, DbError> {
        workflows::get_version(&self.pool, workflow_id, version).await
    }

    async fn insert_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        executions::insert_execution(&self.pool, row).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        executions::get_execution(&self.pool, id).await
    }

    async fn update_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        executions::update_execution(&self.pool, row).await
    }

    async fn claim_execution(&self, id: Uuid, from: &str, to: &str) -> Result<bool, DbError> {
        executions::claim_execution(&self.pool, id, from, to).await
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ExecutionRow>, DbError> {
        executions::list_executions(&self.pool, workflow_id, limit, offset).await
    }

    async fn list_executions_by_status(&self, statuses: &[&str]) -> Result<Vec<ExecutionRow>, DbError> {
        executions::list_executions_by_status(&self.pool, statuses).await
    }

    async fn upsert_step(&self, row: &ExecutionStepRow) -> Result<(), DbError> {
        executions::upsert_step(&self.pool, row).await
    }

    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError> {
        executions::list_steps(&self.pool, execution_id).await
    }

    async fn upsert_schedule(&self, row: &ScheduleRow) -> Result<(), DbError> {
        schedules::upsert_schedule(&self.pool, row).await
    }

    async fn get_schedule(&self, workflow_id: Uuid) -> Result<ScheduleRow, DbError> {
        schedules::get_schedule(&self.pool, workflow_id).await
    }

    async fn delete_schedule(&self, workflow_id: Uuid) -> Result<(), DbError> {
        schedules::delete_schedule(&self.pool, workflow_id).await
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleRow>, DbError> {
        schedules::list_due(&self.pool, now).await
    }

    async fn upsert_webhook(&self, row: &WebhookRow) -> Result<(), DbError> {
        webhooks::upsert_webhook(&self.pool, row).await
    }

    async fn get_webhook(&self, workflow_id: Uuid) -> Result<WebhookRow, DbError> {
        webhooks::get_webhook(&self.pool, workflow_id).await
    }

    async fn get_webhook_by_path(&self, path: &str) -> Result<WebhookRow, DbError> {
        webhooks::get_webhook_by_path(&self.pool, path).await
    }

    async fn delete_webhook(&self, workflow_id: Uuid) -> Result<(), DbError> {
        webhooks::delete_webhook(&self.pool, workflow_id).await
    }
}
