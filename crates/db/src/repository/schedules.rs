//! Schedule repository functions. One schedule per workflow.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::ScheduleRow, DbError};

const SCHEDULE_COLUMNS: &str = "id, workflow_id, cron_expression, timezone, enabled, \
    next_run_at, last_run_at, last_run_status, total_runs, successful_runs, failed_runs, \
    consecutive_failures, auto_disabled, trigger_data, created_at, updated_at";

pub async fn upsert_schedule(pool: &PgPool, row: &ScheduleRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_schedules (
            id, workflow_id, cron_expression, timezone, enabled, next_run_at, last_run_at,
            last_run_status, total_runs, successful_runs, failed_runs, consecutive_failures,
            auto_disabled, trigger_data, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (workflow_id) DO UPDATE
        SET cron_expression = EXCLUDED.cron_expression, timezone = EXCLUDED.timezone,
            enabled = EXCLUDED.enabled, next_run_at = EXCLUDED.next_run_at,
            last_run_at = EXCLUDED.last_run_at, last_run_status = EXCLUDED.last_run_status,
            total_runs = EXCLUDED.total_runs, successful_runs = EXCLUDED.successful_runs,
            failed_runs = EXCLUDED.failed_runs,
            consecutive_failures = EXCLUDED.consecutive_failures,
            auto_disabled = EXCLUDED.auto_disabled, trigger_data = EXCLUDED.trigger_data,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.cron_expression)
    .bind(&row.timezone)
    .bind(row.enabled)
    .bind(row.next_run_at)
    .bind(row.last_run_at)
    .bind(&row.last_run_status)
    .bind(row.total_runs)
    .bind(row.successful_runs)
    .bind(row.failed_runs)
    .bind(row.consecutive_failures)
    .bind(row.auto_disabled)
    .bind(&row.trigger_data)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    Ok(())
}

pub async fn get_schedule(pool: &PgPool, workflow_id: Uuid) -> Result<ScheduleRow, DbError> {
    let sql = format!("SELECT {SCHEDULE_COLUMNS} FROM workflow_schedules WHERE workflow_id = $1");
    sqlx::query_as::<_, ScheduleRow>(&sql)
        .bind(workflow_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn delete_schedule(pool: &PgPool, workflow_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflow_schedules WHERE workflow_id = $1")
        .bind(workflow_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Enabled schedules due at or before `now`, oldest due first.
pub async fn list_due(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<ScheduleRow>, DbError> {
    let sql = format!(
        "SELECT {SCHEDULE_COLUMNS} FROM workflow_schedules \
         WHERE enabled AND next_run_at IS NOT NULL AND next_run_at <= $1 \
         ORDER BY next_run_at ASC"
    );
    let rows = sqlx::query_as::<_, ScheduleRow>(&sql)
        .bind(now)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
