use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::WebhookRow;
use engine::webhook::{InboundRequest, WebhookInput};

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/workflows/:id/webhook",
            get(get_webhook)
                .post(create_webhook)
                .put(update_webhook)
                .delete(delete_webhook),
        )
        .route("/hooks/:path", any(receive))
}

/// The row plus the URL callers should hit.
fn present(row: WebhookRow) -> Result<Value, ApiError> {
    let url = format!("/api/v1/hooks/{}", row.path);
    let mut value = serde_json::to_value(row)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("url".into(), json!(url));
    }
    Ok(value)
}

async fn create_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<WebhookInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let row = state.engine.webhooks().create(id, input).await?;
    Ok((StatusCode::CREATED, Json(present(row)?)))
}

async fn get_webhook(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Value>, ApiError> {
    let row = state.engine.webhooks().get(id).await?;
    Ok(Json(present(row)?))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<WebhookInput>,
) -> Result<Json<Value>, ApiError> {
    let row = state.engine.webhooks().update(id, input).await?;
    Ok(Json(present(row)?))
}

async fn delete_webhook(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state.engine.webhooks().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Inbound call from a third party.
async fn receive(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect();

    let request = InboundRequest {
        path,
        method: method.as_str().to_owned(),
        headers,
        query,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        raw_body: body.to_vec(),
        remote_ip: peer.map(|ConnectInfo(addr)| addr.ip()),
    };

    let response = state.engine.webhooks().handle(request).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::ACCEPTED);
    Ok((status, Json(response.body)).into_response())
}
