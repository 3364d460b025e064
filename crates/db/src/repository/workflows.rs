//! Workflow and workflow-version operations.

use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;

use crate::{
    models::{Page, WorkflowFilter, WorkflowRow, WorkflowVersionRow},
    DbError,
};

const WORKFLOW_COLUMNS: &str = "id, human_id, project_id, organisation_id, name, description, \
    status, trigger_type, trigger_config, definition, tags, category, icon, color, version, \
    environment, total_executions, successful_executions, failed_executions, created_at, updated_at";

/// Insert a new workflow row.
pub async fn insert_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflows (
            id, human_id, project_id, organisation_id, name, description, status,
            trigger_type, trigger_config, definition, tags, category, icon, color, version,
            environment, total_executions, successful_executions, failed_executions,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21)
        "#,
    )
    .bind(row.id)
    .bind(&row.human_id)
    .bind(row.project_id)
    .bind(row.organisation_id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.status)
    .bind(&row.trigger_type)
    .bind(&row.trigger_config)
    .bind(&row.definition)
    .bind(&row.tags)
    .bind(&row.category)
    .bind(&row.icon)
    .bind(&row.color)
    .bind(row.version)
    .bind(&row.environment)
    .bind(row.total_executions)
    .bind(row.successful_executions)
    .bind(row.failed_executions)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    Ok(())
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1");
    sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, sqlx::Postgres>, filter: &'a WorkflowFilter) {
    qb.push(" WHERE TRUE");
    if let Some(project_id) = filter.project_id {
        qb.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(category) = &filter.category {
        qb.push(" AND category = ").push_bind(category);
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR human_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

/// Filtered, paginated workflows ordered by creation time (newest first).
pub async fn list_workflows(
    pool: &PgPool,
    filter: &WorkflowFilter,
) -> Result<Page<WorkflowRow>, DbError> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM workflows");
    push_filter(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(format!("SELECT {WORKFLOW_COLUMNS} FROM workflows"));
    push_filter(&mut select, filter);
    select.push(" ORDER BY created_at DESC, id DESC");
    if filter.limit > 0 {
        select.push(" LIMIT ").push_bind(filter.limit);
    }
    select.push(" OFFSET ").push_bind(filter.offset.max(0));
    let items = select.build_query_as::<WorkflowRow>().fetch_all(pool).await?;

    Ok(Page { items, total })
}

pub async fn list_workflows_by_trigger(
    pool: &PgPool,
    trigger_type: &str,
    status: &str,
) -> Result<Vec<WorkflowRow>, DbError> {
    let sql = format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE trigger_type = $1 AND status = $2"
    );
    let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(trigger_type)
        .bind(status)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Overwrite every mutable column of an existing workflow.
pub async fn update_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflows
        SET name = $2, description = $3, status = $4, trigger_type = $5, trigger_config = $6,
            definition = $7, tags = $8, category = $9, icon = $10, color = $11, version = $12,
            environment = $13, organisation_id = $14, updated_at = $15
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.status)
    .bind(&row.trigger_type)
    .bind(&row.trigger_config)
    .bind(&row.definition)
    .bind(&row.tags)
    .bind(&row.category)
    .bind(&row.icon)
    .bind(&row.color)
    .bind(row.version)
    .bind(&row.environment)
    .bind(row.organisation_id)
    .bind(row.updated_at)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Permanently delete a workflow. Dependent rows go with it via `ON DELETE CASCADE`.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &PgPool, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

pub async fn record_outcome(pool: &PgPool, id: Uuid, succeeded: bool) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflows
        SET total_executions = total_executions + 1,
            successful_executions = successful_executions + CASE WHEN $2 THEN 1 ELSE 0 END,
            failed_executions = failed_executions + CASE WHEN $2 THEN 0 ELSE 1 END
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(succeeded)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn insert_version(pool: &PgPool, row: &WorkflowVersionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_versions
            (workflow_id, version, name, trigger_type, trigger_config, definition, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(row.workflow_id)
    .bind(row.version)
    .bind(&row.name)
    .bind(&row.trigger_type)
    .bind(&row.trigger_config)
    .bind(&row.definition)
    .bind(row.created_at)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    Ok(())
}

pub async fn get_version(
    pool: &PgPool,
    workflow_id: Uuid,
    version: i32,
) -> Result<WorkflowVersionRow, DbError> {
    sqlx::query_as::<_, WorkflowVersionRow>(
        r#"
        SELECT workflow_id, version, name, trigger_type, trigger_config, definition, created_at
        FROM workflow_versions
        WHERE workflow_id = $1 AND version = $2
        "#,
    )
    .bind(workflow_id)
    .bind(version)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
