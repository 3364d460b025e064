use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use engine::Event;

use super::optional_json;
use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/events/:event_type", post(publish_event))
}

#[derive(Debug, Deserialize)]
struct PublishQuery {
    source: Option<String>,
}

/// Publish the body as the event payload. Subscribed workflows are started
/// by the event listener, not by this request.
async fn publish_event(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event_type = event_type.trim().to_owned();
    if event_type.is_empty() {
        return Err(ApiError::BadRequest("event type must not be empty".into()));
    }
    let payload: Value = optional_json(&body)?;

    let mut event = Event::new(event_type, payload);
    event.source = query.source;
    let event_id = event.id;
    let event_type = event.event_type.clone();
    let listeners = state.engine.events().publish(event);
    tracing::info!(%event_type, %event_id, listeners, "event accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event_id": event_id, "event_type": event_type, "listeners": listeners })),
    ))
}
