use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use nodes::NodeDescriptor;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows/nodes/available", get(available_nodes))
        .route("/workflows/integrations/available", get(available_integrations))
}

async fn available_nodes(State(state): State<AppState>) -> Json<Vec<NodeDescriptor>> {
    Json(state.engine.registry().descriptors())
}

async fn available_integrations(State(state): State<AppState>) -> Json<Vec<NodeDescriptor>> {
    Json(state.engine.registry().integrations())
}
