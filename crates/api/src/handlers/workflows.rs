use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{WorkflowFilter, WorkflowRow, WorkflowStatus};
use engine::WorkflowInput;

use super::paging;
use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/workflows/:id",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/workflows/:id/duplicate", post(duplicate_workflow))
}

/// The row with its stored definition spread into the top level, the
/// shape the editor reads and writes.
pub(crate) fn present(row: WorkflowRow) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(row)?;
    if let Some(object) = value.as_object_mut() {
        if let Some(Value::Object(definition)) = object.remove("definition") {
            for (key, field) in definition {
                object.entry(key).or_insert(field);
            }
        }
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<WorkflowStatus>,
    category: Option<String>,
    search: Option<String>,
    project_id: Option<Uuid>,
    page: Option<i64>,
    per_page: Option<i64>,
}

async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let (page, per_page) = paging(query.page, query.per_page);
    let filter = WorkflowFilter {
        project_id: query.project_id,
        status: query.status.map(|s| s.as_str().to_owned()),
        category: query.category,
        search: query.search.filter(|s| !s.trim().is_empty()),
        limit: per_page,
        offset: (page - 1) * per_page,
    };
    let result = state.engine.workflows().list(&filter).await?;
    let items = result.items.into_iter().map(present).collect::<Result<Vec<_>, _>>()?;

    Ok(Json(json!({
        "items": items,
        "total": result.total,
        "page": page,
        "per_page": per_page,
    })))
}

async fn create_workflow(
    State(state): State<AppState>,
    Json(input): Json<WorkflowInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let row = state.engine.workflows().create(input).await?;
    Ok((StatusCode::CREATED, Json(present(row)?)))
}

async fn get_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let row = state.engine.workflows().get(id).await?;
    Ok(Json(present(row)?))
}

async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<WorkflowInput>,
) -> Result<Json<Value>, ApiError> {
    let row = state.engine.workflows().update(id, input).await?;
    Ok(Json(present(row)?))
}

async fn delete_workflow(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.engine.workflows().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn duplicate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let row = state.engine.workflows().duplicate(id).await?;
    Ok((StatusCode::CREATED, Json(present(row)?)))
}
