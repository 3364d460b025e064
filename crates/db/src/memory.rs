//! In-memory [`Store`] used when no `DATABASE_URL` is configured and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    ExecutionRow, ExecutionStepRow, Page, ScheduleRow, WebhookRow, WorkflowFilter, WorkflowRow,
    WorkflowVersionRow,
};
use crate::{DbError, Store};

#[derive(Default)]
struct Inner {
    workflows: HashMap<Uuid, WorkflowRow>,
    versions: HashMap<(Uuid, i32), WorkflowVersionRow>,
    executions: HashMap<Uuid, ExecutionRow>,
    /// execution_id -> steps
    steps: HashMap<Uuid, Vec<ExecutionStepRow>>,
    /// workflow_id -> schedule
    schedules: HashMap<Uuid, ScheduleRow>,
    /// workflow_id -> webhook
    webhooks: HashMap<Uuid, WebhookRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let offset = offset.max(0) as usize;
    let limit = if limit <= 0 { usize::MAX } else { limit as usize };
    let items = if offset >= items.len() {
        Vec::new()
    } else {
        items.drain(offset..).take(limit).collect()
    };
    Page { items, total }
}

fn matches_filter(row: &WorkflowRow, filter: &WorkflowFilter) -> bool {
    if filter.project_id.is_some_and(|p| p != row.project_id) {
        return false;
    }
    if filter.status.as_deref().is_some_and(|s| s != row.status) {
        return false;
    }
    if filter
        .category
        .as_deref()
        .is_some_and(|c| row.category.as_deref() != Some(c))
    {
        return false;
    }
    if let Some(search) = filter.search.as_deref().map(str::to_lowercase) {
        let hit = row.name.to_lowercase().contains(&search)
            || row.human_id.to_lowercase().contains(&search)
            || row
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&search));
        if !hit {
            return false;
        }
    }
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        if inner.workflows.contains_key(&row.id) {
            return Err(DbError::Conflict(format!("workflow {} already exists", row.id)));
        }
        inner.workflows.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        self.inner
            .read()
            .await
            .workflows
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self, filter: &WorkflowFilter) -> Result<Page<WorkflowRow>, DbError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<WorkflowRow> = inner
            .workflows
            .values()
            .filter(|w| matches_filter(w, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(rows, filter.limit, filter.offset))
    }

    async fn list_workflows_by_trigger(
        &self,
        trigger_type: &str,
        status: &str,
    ) -> Result<Vec<WorkflowRow>, DbError> {
        Ok(self
            .inner
            .read()
            .await
            .workflows
            .values()
            .filter(|w| w.trigger_type == trigger_type && w.status == status)
            .cloned()
            .collect())
    }

    async fn update_workflow(&self, row: &WorkflowRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let existing = inner.workflows.get_mut(&row.id).ok_or(DbError::NotFound)?;
        *existing = row.clone();
        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        inner.workflows.remove(&id).ok_or(DbError::NotFound)?;
        inner.versions.retain(|(wf, _), _| *wf != id);
        let execution_ids: Vec<Uuid> = inner
            .executions
            .values()
            .filter(|e| e.workflow_id == id)
            .map(|e| e.id)
            .collect();
        for exec_id in execution_ids {
            inner.executions.remove(&exec_id);
            inner.steps.remove(&exec_id);
        }
        inner.schedules.remove(&id);
        inner.webhooks.remove(&id);
        Ok(())
    }

    async fn record_workflow_outcome(&self, id: Uuid, succeeded: bool) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let wf = inner.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        wf.total_executions += 1;
        if succeeded {
            wf.successful_executions += 1;
        } else {
            wf.failed_executions += 1;
        }
        Ok(())
    }

    async fn insert_workflow_version(&self, row: &WorkflowVersionRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let key = (row.workflow_id, row.version);
        if inner.versions.contains_key(&key) {
            return Err(DbError::Conflict(format!(
                "workflow {} version {} already exists",
                row.workflow_id, row.version
            )));
        }
        inner.versions.insert(key, row.clone());
        Ok(())
    }

    async fn get_workflow_version(
        &self,
        workflow_id: Uuid,
        version: i32,
    ) -> Result<WorkflowVersionRow, DbError> {
        self.inner
            .read()
            .await
            .versions
            .get(&(workflow_id, version))
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn insert_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        self.inner.write().await.executions.insert(row.id, row.clone());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRow, DbError> {
        self.inner
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_execution(&self, row: &ExecutionRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let existing = inner.executions.get_mut(&row.id).ok_or(DbError::NotFound)?;
        *existing = row.clone();
        Ok(())
    }

    async fn claim_execution(&self, id: Uuid, from: &str, to: &str) -> Result<bool, DbError> {
        let mut inner = self.inner.write().await;
        let existing = inner.executions.get_mut(&id).ok_or(DbError::NotFound)?;
        if existing.status != from {
            return Ok(false);
        }
        existing.status = to.to_string();
        Ok(true)
    }

    async fn list_executions(
        &self,
        workflow_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Page<ExecutionRow>, DbError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ExecutionRow> = inner
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(rows, limit, offset))
    }

    async fn list_executions_by_status(&self, statuses: &[&str]) -> Result<Vec<ExecutionRow>, DbError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<ExecutionRow> = inner
            .executions
            .values()
            .filter(|e| statuses.contains(&e.status.as_str()))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn upsert_step(&self, row: &ExecutionStepRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let steps = inner.steps.entry(row.execution_id).or_default();
        match steps.iter_mut().find(|s| s.id == row.id) {
            Some(existing) => *existing = row.clone(),
            None => steps.push(row.clone()),
        }
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError> {
        let mut steps = self
            .inner
            .read()
            .await
            .steps
            .get(&execution_id)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn upsert_schedule(&self, row: &ScheduleRow) -> Result<(), DbError> {
        self.inner
            .write()
            .await
            .schedules
            .insert(row.workflow_id, row.clone());
        Ok(())
    }

    async fn get_schedule(&self, workflow_id: Uuid) -> Result<ScheduleRow, DbError> {
        self.inner
            .read()
            .await
            .schedules
            .get(&workflow_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn delete_schedule(&self, workflow_id: Uuid) -> Result<(), DbError> {
        self.inner
            .write()
            .await
            .schedules
            .remove(&workflow_id)
            .map(|_| ())
            .ok_or(DbError::NotFound)
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleRow>, DbError> {
        let inner = self.inner.read().await;
        let mut due: Vec<ScheduleRow> = inner
            .schedules
            .values()
            .filter(|s| s.enabled && s.next_run_at.is_some_and(|t| t <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn upsert_webhook(&self, row: &WebhookRow) -> Result<(), DbError> {
        let mut inner = self.inner.write().await;
        let taken = inner
            .webhooks
            .values()
            .any(|w| w.path == row.path && w.workflow_id != row.workflow_id);
        if taken {
            return Err(DbError::Conflict(format!("webhook path '{}' is already in use", row.path)));
        }
        inner.webhooks.insert(row.workflow_id, row.clone());
        Ok(())
    }

    async fn get_webhook(&self, workflow_id: Uuid) -> Result<WebhookRow, DbError> {
        self.inner
            .read()
            .await
            .webhooks
            .get(&workflow_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn get_webhook_by_path(&self, path: &str) -> Result<WebhookRow, DbError> {
        self.inner
            .read()
            .await
            .webhooks
            .values()
            .find(|w| w.path == path)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn delete_webhook(&self, workflow_id: Uuid) -> Result<(), DbError> {
        self.inner
            .write()
            .await
            .webhooks
            .remove(&workflow_id)
            .map(|_| ())
            .ok_or(DbError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn workflow(name: &str, offset_secs: i64) -> WorkflowRow {
        let now = Utc::now() + Duration::seconds(offset_secs);
        WorkflowRow {
            id: Uuid::new_v4(),
            human_id: format!("WF-{}", &name.to_uppercase()),
            project_id: Uuid::nil(),
            organisation_id: None,
            name: name.to_owned(),
            description: None,
            status: "draft".into(),
            trigger_type: "manual".into(),
            trigger_config: json!({}),
            definition: json!({"nodes": [], "edges": []}),
            tags: vec![],
            category: None,
            icon: None,
            color: None,
            version: 1,
            environment: "development".into(),
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn execution(workflow_id: Uuid, status: &str) -> ExecutionRow {
        ExecutionRow {
            id: Uuid::new_v4(),
            human_id: "EX-00000000".into(),
            workflow_id,
            workflow_version: 1,
            status: status.into(),
            trigger_source: "manual".into(),
            trigger_data: json!({}),
            input_data: json!({}),
            output_data: None,
            execution_path: vec![],
            current_node_id: None,
            total_nodes: 0,
            completed_nodes: 0,
            failed_nodes: 0,
            skipped_nodes: 0,
            error_message: None,
            error_node_id: None,
            error_stack: None,
            retry_count: 0,
            duration_ms: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            triggered_by: None,
            execution_context: json!({}),
            notes: None,
        }
    }

    fn webhook(workflow_id: Uuid, path: &str) -> WebhookRow {
        let now = Utc::now();
        WebhookRow {
            id: Uuid::new_v4(),
            workflow_id,
            path: path.into(),
            method: "POST".into(),
            enabled: true,
            require_auth: false,
            secret_key: None,
            allowed_ips: vec![],
            response_mode: "immediate".into(),
            response_data: None,
            total_calls: 0,
            accepted_calls: 0,
            rejected_calls: 0,
            last_called_at: None,
            rate_limit_max_calls: None,
            rate_limit_window_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn list_workflows_filters_and_paginates_newest_first() {
        let store = MemoryStore::new();
        for (i, name) in ["alpha", "beta", "gamma"].iter().enumerate() {
            store.insert_workflow(&workflow(name, i as i64)).await.unwrap();
        }

        let page = store
            .list_workflows(&WorkflowFilter { limit: 2, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].name, "gamma");

        let page = store
            .list_workflows(&WorkflowFilter {
                search: Some("BET".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "beta");
    }

    #[tokio::test]
    async fn delete_workflow_cascades() {
        let store = MemoryStore::new();
        let wf = workflow("doomed", 0);
        store.insert_workflow(&wf).await.unwrap();
        let exec = execution(wf.id, "completed");
        store.insert_execution(&exec).await.unwrap();
        store.upsert_webhook(&webhook(wf.id, "doomed-hook")).await.unwrap();

        store.delete_workflow(wf.id).await.unwrap();

        assert!(matches!(store.get_execution(exec.id).await, Err(DbError::NotFound)));
        assert!(matches!(store.get_webhook_by_path("doomed-hook").await, Err(DbError::NotFound)));
        assert!(matches!(store.delete_workflow(wf.id).await, Err(DbError::NotFound)));
    }

    #[tokio::test]
    async fn webhook_path_is_unique_across_workflows() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert_webhook(&webhook(a, "shared")).await.unwrap();
        // Re-upserting for the owner is fine.
        store.upsert_webhook(&webhook(a, "shared")).await.unwrap();
        let err = store.upsert_webhook(&webhook(b, "shared")).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn executions_by_status() {
        let store = MemoryStore::new();
        let wf = Uuid::new_v4();
        store.insert_execution(&execution(wf, "running")).await.unwrap();
        store.insert_execution(&execution(wf, "queued")).await.unwrap();
        store.insert_execution(&execution(wf, "completed")).await.unwrap();

        let live = store.list_executions_by_status(&["queued", "running"]).await.unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(store.list_executions(wf, 10, 0).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn claims_only_move_rows_still_in_the_expected_status() {
        let store = MemoryStore::new();
        let exec = execution(Uuid::new_v4(), "queued");
        store.insert_execution(&exec).await.unwrap();

        assert!(store.claim_execution(exec.id, "queued", "stopped").await.unwrap());
        assert!(!store.claim_execution(exec.id, "queued", "running").await.unwrap());
        assert_eq!(store.get_execution(exec.id).await.unwrap().status, "stopped");
        assert!(matches!(
            store.claim_execution(Uuid::new_v4(), "queued", "running").await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn due_schedules_skip_disabled() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mk = |enabled: bool, next: Option<DateTime<Utc>>| ScheduleRow {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            cron_expression: "* * * * *".into(),
            timezone: "UTC".into(),
            enabled,
            next_run_at: next,
            last_run_at: None,
            last_run_status: None,
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            consecutive_failures: 0,
            auto_disabled: false,
            trigger_data: json!({}),
            created_at: now,
            updated_at: now,
        };
        store.upsert_schedule(&mk(true, Some(now - Duration::seconds(1)))).await.unwrap();
        store.upsert_schedule(&mk(false, Some(now - Duration::seconds(1)))).await.unwrap();
        store.upsert_schedule(&mk(true, Some(now + Duration::minutes(1)))).await.unwrap();
        store.upsert_schedule(&mk(true, None)).await.unwrap();

        assert_eq!(store.list_due_schedules(now).await.unwrap().len(), 1);
    }
}
