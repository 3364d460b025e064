use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use db::models::ScheduleRow;
use engine::scheduler::ScheduleInput;

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/workflows/:id/schedule",
        get(get_schedule)
            .post(create_schedule)
            .put(update_schedule)
            .delete(delete_schedule),
    )
}

async fn create_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ScheduleInput>,
) -> Result<(StatusCode, Json<ScheduleRow>), ApiError> {
    let row = state.engine.scheduler().create(id, input).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn get_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<ScheduleRow>, ApiError> {
    Ok(Json(state.engine.scheduler().get(id).await?))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ScheduleInput>,
) -> Result<Json<ScheduleRow>, ApiError> {
    Ok(Json(state.engine.scheduler().update(id, input).await?))
}

async fn delete_schedule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.engine.scheduler().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
