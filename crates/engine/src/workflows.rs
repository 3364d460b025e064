//! Workflow Definition Store: create, edit, copy and delete workflows.
//!
//! Every write validates the graph first and snapshots the result as a new
//! `workflow_versions` row, so executions can pin the version they ran.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use db::models::{Page, TriggerType, WorkflowFilter, WorkflowRow, WorkflowStatus, WorkflowVersionRow};
use db::Store;
use nodes::NodeRegistry;

use crate::dag::validate_workflow;
use crate::dispatcher::human_id;
use crate::models::{ErrorHandling, RetryPolicy, Viewport, WorkflowDefinition, WorkflowEdge, WorkflowNode};
use crate::EngineError;

/// Body of workflow create/update calls. Graph fields sit at the top
/// level, as the editor sends them. On update, absent fields keep their
/// current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub project_id: Option<Uuid>,
    pub organisation_id: Option<Uuid>,
    pub status: Option<WorkflowStatus>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_config: Option<Value>,
    pub nodes: Option<Vec<WorkflowNode>>,
    pub edges: Option<Vec<WorkflowEdge>>,
    pub viewport: Option<Viewport>,
    pub global_variables: Option<Map<String, Value>>,
    pub timeout_seconds: Option<f64>,
    pub retry_policy: Option<RetryPolicy>,
    pub error_handling: Option<ErrorHandling>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub environment: Option<String>,
}

impl WorkflowInput {
    fn apply_to(&mut self, def: &mut WorkflowDefinition) {
        if let Some(nodes) = self.nodes.take() {
            def.nodes = nodes;
        }
        if let Some(edges) = self.edges.take() {
            def.edges = edges;
        }
        if let Some(viewport) = self.viewport.take() {
            def.viewport = viewport;
        }
        if let Some(variables) = self.global_variables.take() {
            def.global_variables = variables;
        }
        if let Some(timeout) = self.timeout_seconds.take() {
            def.timeout_seconds = (timeout > 0.0).then_some(timeout);
        }
        if let Some(policy) = self.retry_policy.take() {
            def.retry_policy = policy;
        }
        if let Some(handling) = self.error_handling.take() {
            def.error_handling = handling;
        }
    }
}

#[derive(Clone)]
pub struct WorkflowService {
    store: Arc<dyn Store>,
    registry: Arc<NodeRegistry>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn Store>, registry: Arc<NodeRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn create(&self, mut input: WorkflowInput) -> Result<WorkflowRow, EngineError> {
        let name = input
            .name
            .take()
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| EngineError::Validation("name is required".into()))?;

        let mut def = WorkflowDefinition::default();
        input.apply_to(&mut def);
        validate_workflow(&def, &self.registry)?;

        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            human_id: human_id("WF"),
            project_id: input.project_id.unwrap_or_default(),
            organisation_id: input.organisation_id,
            name,
            description: input.description,
            status: input.status.unwrap_or(WorkflowStatus::Draft).as_str().into(),
            trigger_type: input.trigger_type.unwrap_or(TriggerType::Manual).as_str().into(),
            trigger_config: input.trigger_config.unwrap_or_else(|| json!({})),
            definition: def.to_value()?,
            tags: input.tags.unwrap_or_default(),
            category: input.category,
            icon: input.icon,
            color: input.color,
            version: 1,
            environment: input.environment.unwrap_or_else(|| "production".into()),
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_workflow(&row).await?;
        self.snapshot(&row).await?;
        info!(workflow_id = %row.id, human_id = %row.human_id, "workflow created");
        Ok(row)
    }

    pub async fn get(&self, id: Uuid) -> Result<WorkflowRow, EngineError> {
        self.store.get_workflow(id).await.map_err(EngineError::lookup("workflow"))
    }

    pub async fn list(&self, filter: &WorkflowFilter) -> Result<Page<WorkflowRow>, EngineError> {
        Ok(self.store.list_workflows(filter).await?)
    }

    /// Apply `input` and record the result as the next version.
    pub async fn update(&self, id: Uuid, mut input: WorkflowInput) -> Result<WorkflowRow, EngineError> {
        let mut row = self.get(id).await?;
        let mut def = WorkflowDefinition::from_value(&row.definition)?;
        input.apply_to(&mut def);
        validate_workflow(&def, &self.registry)?;

        if let Some(name) = input.name {
            let name = name.trim().to_owned();
            if name.is_empty() {
                return Err(EngineError::Validation("name must not be empty".into()));
            }
            row.name = name;
        }
        if let Some(description) = input.description {
            row.description = Some(description);
        }
        if let Some(project_id) = input.project_id {
            row.project_id = project_id;
        }
        if let Some(organisation_id) = input.organisation_id {
            row.organisation_id = Some(organisation_id);
        }
        if let Some(status) = input.status {
            row.status = status.as_str().into();
        }
        if let Some(trigger_type) = input.trigger_type {
            row.trigger_type = trigger_type.as_str().into();
        }
        if let Some(trigger_config) = input.trigger_config {
            row.trigger_config = trigger_config;
        }
        if let Some(tags) = input.tags {
            row.tags = tags;
        }
        if input.category.is_some() {
            row.category = input.category;
        }
        if input.icon.is_some() {
            row.icon = input.icon;
        }
        if input.color.is_some() {
            row.color = input.color;
        }
        if let Some(environment) = input.environment {
            row.environment = environment;
        }

        row.definition = def.to_value()?;
        row.version += 1;
        row.updated_at = Utc::now();
        self.store.update_workflow(&row).await?;
        self.snapshot(&row).await?;
        info!(workflow_id = %row.id, version = row.version, "workflow updated");
        Ok(row)
    }

    /// Copy the definition into a new draft. Schedules, webhooks and
    /// execution history stay with the original.
    pub async fn duplicate(&self, id: Uuid) -> Result<WorkflowRow, EngineError> {
        let source = self.get(id).await?;
        let now = Utc::now();
        let row = WorkflowRow {
            id: Uuid::new_v4(),
            human_id: human_id("WF"),
            name: format!("{} (copy)", source.name),
            status: WorkflowStatus::Draft.as_str().into(),
            version: 1,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            created_at: now,
            updated_at: now,
            ..source
        };
        self.store.insert_workflow(&row).await?;
        self.snapshot(&row).await?;
        info!(source_id = %id, workflow_id = %row.id, "workflow duplicated");
        Ok(row)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), EngineError> {
        self.store
            .delete_workflow(id)
            .await
            .map_err(EngineError::lookup("workflow"))?;
        info!(workflow_id = %id, "workflow deleted");
        Ok(())
    }

    async fn snapshot(&self, row: &WorkflowRow) -> Result<(), EngineError> {
        self.store
            .insert_workflow_version(&WorkflowVersionRow {
                workflow_id: row.id,
                version: row.version,
                name: row.name.clone(),
                trigger_type: row.trigger_type.clone(),
                trigger_config: row.trigger_config.clone(),
                definition: row.definition.clone(),
                created_at: row.updated_at,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use db::MemoryStore;

    use super::*;

    fn service() -> WorkflowService {
        WorkflowService::new(Arc::new(MemoryStore::new()), Arc::new(NodeRegistry::with_builtins()))
    }

    fn graph() -> WorkflowInput {
        serde_json::from_value(json!({
            "name": "Orders",
            "nodes": [
                {"id": "t", "type": "trigger", "data": {"type": "trigger"}},
                {"id": "l", "type": "action", "data": {"type": "log", "config": {"message": "hi"}}}
            ],
            "edges": [{"id": "e", "source": "t", "target": "l"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn create_snapshots_version_one() {
        let svc = service();
        let row = svc.create(graph()).await.unwrap();

        assert_eq!(row.status, "draft");
        assert_eq!(row.version, 1);
        assert!(row.human_id.starts_with("WF-"));
        let version = svc.store.get_workflow_version(row.id, 1).await.unwrap();
        assert_eq!(version.definition, row.definition);
    }

    #[tokio::test]
    async fn update_bumps_version_and_keeps_old_snapshot() {
        let svc = service();
        let row = svc.create(graph()).await.unwrap();

        let update = WorkflowInput {
            status: Some(WorkflowStatus::Active),
            timeout_seconds: Some(30.0),
            ..Default::default()
        };
        let updated = svc.update(row.id, update).await.unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.status, "active");
        assert_eq!(updated.definition["timeout_seconds"], 30.0);
        let v1 = svc.store.get_workflow_version(row.id, 1).await.unwrap();
        assert!(v1.definition["timeout_seconds"].is_null());
    }

    #[tokio::test]
    async fn invalid_graphs_are_rejected() {
        let svc = service();
        let mut cyclic = graph();
        cyclic.edges = Some(serde_json::from_value(json!([
            {"id": "a", "source": "t", "target": "l"},
            {"id": "b", "source": "l", "target": "t"}
        ])).unwrap());
        assert!(matches!(svc.create(cyclic).await, Err(EngineError::CycleDetected)));

        let mut unnamed = graph();
        unnamed.name = Some("  ".into());
        assert!(matches!(svc.create(unnamed).await, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_starts_a_fresh_draft() {
        let svc = service();
        let row = svc.create(graph()).await.unwrap();
        svc.update(row.id, WorkflowInput { status: Some(WorkflowStatus::Active), ..Default::default() })
            .await
            .unwrap();

        let copy = svc.duplicate(row.id).await.unwrap();

        assert_ne!(copy.id, row.id);
        assert_eq!(copy.name, "Orders (copy)");
        assert_eq!(copy.status, "draft");
        assert_eq!(copy.version, 1);
        assert_eq!(copy.definition, row.definition);
        assert!(svc.store.get_workflow_version(copy.id, 1).await.is_ok());
    }
}
