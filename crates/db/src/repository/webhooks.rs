//! Webhook repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::WebhookRow, DbError};

const WEBHOOK_COLUMNS: &str = "id, workflow_id, path, method, enabled, require_auth, \
    secret_key, allowed_ips, response_mode, response_data, total_calls, accepted_calls, \
    rejected_calls, last_called_at, rate_limit_max_calls, rate_limit_window_seconds, \
    created_at, updated_at";

/// Insert or replace the webhook of a workflow. A path owned by another
/// workflow trips the unique index and surfaces as `DbError::Conflict`.
pub async fn upsert_webhook(pool: &PgPool, row: &WebhookRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_webhooks (
            id, workflow_id, path, method, enabled, require_auth, secret_key, allowed_ips,
            response_mode, response_data, total_calls, accepted_calls, rejected_calls,
            last_called_at, rate_limit_max_calls, rate_limit_window_seconds, created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (workflow_id) DO UPDATE
        SET path = EXCLUDED.path, method = EXCLUDED.method, enabled = EXCLUDED.enabled,
            require_auth = EXCLUDED.require_auth, secret_key = EXCLUDED.secret_key,
            allowed_ips = EXCLUDED.allowed_ips, response_mode = EXCLUDED.response_mode,
            response_data = EXCLUDED.response_data, total_calls = EXCLUDED.total_calls,
            accepted_calls = EXCLUDED.accepted_calls, rejected_calls = EXCLUDED.rejected_calls,
            last_called_at = EXCLUDED.last_called_at,
            rate_limit_max_calls = EXCLUDED.rate_limit_max_calls,
            rate_limit_window_seconds = EXCLUDED.rate_limit_window_seconds,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.path)
    .bind(&row.method)
    .bind(row.enabled)
    .bind(row.require_auth)
    .bind(&row.secret_key)
    .bind(&row.allowed_ips)
    .bind(&row.response_mode)
    .bind(&row.response_data)
    .bind(row.total_calls)
    .bind(row.accepted_calls)
    .bind(row.rejected_calls)
    .bind(row.last_called_at)
    .bind(row.rate_limit_max_calls)
    .bind(row.rate_limit_window_seconds)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await
    .map_err(DbError::from_write)?;

    Ok(())
}

pub async fn get_webhook(pool: &PgPool, workflow_id: Uuid) -> Result<WebhookRow, DbError> {
    let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM workflow_webhooks WHERE workflow_id = $1");
    sqlx::query_as::<_, WebhookRow>(&sql)
        .bind(workflow_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn get_webhook_by_path(pool: &PgPool, path: &str) -> Result<WebhookRow, DbError> {
    let sql = format!("SELECT {WEBHOOK_COLUMNS} FROM workflow_webhooks WHERE path = $1");
    sqlx::query_as::<_, WebhookRow>(&sql)
        .bind(path)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

pub async fn delete_webhook(pool: &PgPool, workflow_id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM workflow_webhooks WHERE workflow_id = $1")
        .bind(workflow_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
