//! Execution and execution-step repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{ExecutionRow, ExecutionStepRow, Page},
    DbError,
};

const EXECUTION_COLUMNS: &str = "id, human_id, workflow_id, workflow_version, status, \
    trigger_source, trigger_data, input_data, output_data, execution_path, current_node_id, \
    total_nodes, completed_nodes, failed_nodes, skipped_nodes, error_message, error_node_id, \
    error_stack, retry_count, duration_ms, started_at, completed_at, created_at, triggered_by, \
    execution_context, notes";

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

pub async fn insert_execution(pool: &PgPool, row: &ExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_executions (
            id, human_id, workflow_id, workflow_version, status, trigger_source, trigger_data,
            input_data, output_data, execution_path, current_node_id, total_nodes,
            completed_nodes, failed_nodes, skipped_nodes, error_message, error_node_id,
            error_stack, retry_count, duration_ms, started_at, completed_at, created_at,
            triggered_by, execution_context, notes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25, $26)
        "#,
    )
    .bind(row.id)
    .bind(&row.human_id)
    .bind(row.workflow_id)
    .bind(row.workflow_version)
    .bind(&row.status)
    .bind(&row.trigger_source)
    .bind(&row.trigger_data)
    .bind(&row.input_data)
    .bind(&row.output_data)
    .bind(&row.execution_path)
    .bind(&row.current_node_id)
    .bind(row.total_nodes)
    .bind(row.completed_nodes)
    .bind(row.failed_nodes)
    .bind(row.skipped_nodes)
    .bind(&row.error_message)
    .bind(&row.error_node_id)
    .bind(&row.error_stack)
    .bind(row.retry_count)
    .bind(row.duration_ms)
    .bind(row.started_at)
    .bind(row.completed_at)
    .bind(row.created_at)
    .bind(&row.triggered_by)
    .bind(&row.execution_context)
    .bind(&row.notes)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    Ok(())
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<ExecutionRow, DbError> {
    let sql = format!("SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1");
    sqlx::query_as::<_, ExecutionRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Write back the derived state of a run.
pub async fn update_execution(pool: &PgPool, row: &ExecutionRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $2, output_data = $3, execution_path = $4, current_node_id = $5,
            total_nodes = $6, completed_nodes = $7, failed_nodes = $8, skipped_nodes = $9,
            error_message = $10, error_node_id = $11, error_stack = $12, retry_count = $13,
            duration_ms = $14, started_at = $15, completed_at = $16,
            execution_context = $17, notes = $18
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(&row.status)
    .bind(&row.output_data)
    .bind(&row.execution_path)
    .bind(&row.current_node_id)
    .bind(row.total_nodes)
    .bind(row.completed_nodes)
    .bind(row.failed_nodes)
    .bind(row.skipped_nodes)
    .bind(&row.error_message)
    .bind(&row.error_node_id)
    .bind(&row.error_stack)
    .bind(row.retry_count)
    .bind(row.duration_ms)
    .bind(row.started_at)
    .bind(row.completed_at)
    .bind(&row.execution_context)
    .bind(&row.notes)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Compare-and-set on `status`. A missing row is `NotFound`; a row in any
/// other status is left alone and reported as `false`.
pub async fn claim_execution(pool: &PgPool, id: Uuid, from: &str, to: &str) -> Result<bool, DbError> {
    let claimed: Option<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE workflow_executions
        SET status = $3
        WHERE id = $1 AND status = $2
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .fetch_optional(pool)
    .await?;

    if claimed.is_some() {
        return Ok(true);
    }
    get_execution(pool, id).await?;
    Ok(false)
}

/// Executions of one workflow, newest first.
pub async fn list_executions(
    pool: &PgPool,
    workflow_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Page<ExecutionRow>, DbError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM workflow_executions WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_one(pool)
            .await?;

    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE workflow_id = $1 \
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    );
    let limit = if limit > 0 { limit } else { i64::MAX };
    let items = sqlx::query_as::<_, ExecutionRow>(&sql)
        .bind(workflow_id)
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(pool)
        .await?;

    Ok(Page { items, total })
}

pub async fn list_executions_by_status(
    pool: &PgPool,
    statuses: &[&str],
) -> Result<Vec<ExecutionRow>, DbError> {
    let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
    let sql = format!(
        "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE status = ANY($1) \
         ORDER BY created_at ASC"
    );
    let rows = sqlx::query_as::<_, ExecutionRow>(&sql)
        .bind(statuses)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// execution_steps
// ---------------------------------------------------------------------------

pub async fn upsert_step(pool: &PgPool, row: &ExecutionStepRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO execution_steps (
            id, execution_id, node_id, node_type, node_name, step_order, status, attempts,
            input, output, error_message, error_type, duration_ms, started_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status, attempts = EXCLUDED.attempts, output = EXCLUDED.output,
            error_message = EXCLUDED.error_message, error_type = EXCLUDED.error_type,
            duration_ms = EXCLUDED.duration_ms, completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(row.id)
    .bind(row.execution_id)
    .bind(&row.node_id)
    .bind(&row.node_type)
    .bind(&row.node_name)
    .bind(row.step_order)
    .bind(&row.status)
    .bind(row.attempts)
    .bind(&row.input)
    .bind(&row.output)
    .bind(&row.error_message)
    .bind(&row.error_type)
    .bind(row.duration_ms)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// All steps of an execution ordered by `step_order`.
pub async fn list_steps(pool: &PgPool, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError> {
    let rows = sqlx::query_as::<_, ExecutionStepRow>(
        r#"
        SELECT id, execution_id, node_id, node_type, node_name, step_order, status, attempts,
               input, output, error_message, error_type, duration_ms, started_at, completed_at
        FROM execution_steps
        WHERE execution_id = $1
        ORDER BY step_order ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
