use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStepRow};
use db::Store;
use engine::{EngineError, TriggerRequest};

use super::{optional_json, paging};
use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows/:id/execute", post(execute_workflow))
        .route("/workflows/:id/executions", get(list_executions))
        .route("/workflows/executions/:id", get(get_execution))
        .route("/workflows/executions/:id/steps", get(list_steps))
        .route("/workflows/executions/:id/stop", post(stop_execution))
        .route("/workflows/executions/:id/retry", post(retry_execution))
}

#[derive(Debug, Default, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    input_data: Value,
    triggered_by: Option<String>,
    notes: Option<String>,
}

/// Queue a manual run; the body is optional.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<ExecutionRow>), ApiError> {
    let body: ExecuteRequest = optional_json(&body)?;
    let input = if body.input_data.is_null() { json!({}) } else { body.input_data };

    let mut request = TriggerRequest::manual(input);
    request.triggered_by = body.triggered_by;
    request.notes = body.notes;
    let execution = state.engine.dispatcher().dispatch(id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<i64>,
    per_page: Option<i64>,
}

async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    // 404 for an unknown workflow rather than an empty page.
    state.engine.workflows().get(id).await?;
    let (page, per_page) = paging(query.page, query.per_page);
    let result = state
        .engine
        .store()
        .list_executions(id, per_page, (page - 1) * per_page)
        .await
        .map_err(EngineError::from)?;

    Ok(Json(json!({
        "items": result.items,
        "total": result.total,
        "page": page,
        "per_page": per_page,
    })))
}

async fn get_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ExecutionRow>, ApiError> {
    Ok(Json(load(&state, id).await?))
}

async fn list_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ExecutionStepRow>>, ApiError> {
    load(&state, id).await?;
    let steps = state.engine.store().list_steps(id).await.map_err(EngineError::from)?;
    Ok(Json(steps))
}

async fn stop_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ExecutionRow>, ApiError> {
    Ok(Json(state.engine.dispatcher().stop(id).await?))
}

async fn retry_execution(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ExecutionRow>, ApiError> {
    Ok(Json(state.engine.dispatcher().retry(id).await?))
}

async fn load(state: &AppState, id: Uuid) -> Result<ExecutionRow, ApiError> {
    state.engine.store().get_execution(id).await.map_err(|err| match err {
        db::DbError::NotFound => ApiError::Engine(EngineError::NotFound("execution".into())),
        other => ApiError::Engine(other.into()),
    })
}
