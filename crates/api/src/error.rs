//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use engine::{EngineError, WebhookRejection};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A request body or parameter that could not be read.
    #[error("{0}")]
    BadRequest(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Engine(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let ApiError::Engine(err) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match err {
            EngineError::DuplicateNodeId(_)
            | EngineError::UnknownNodeReference { .. }
            | EngineError::CycleDetected
            | EngineError::UnknownErrorHandler(_)
            | EngineError::UnknownNodeType { .. }
            | EngineError::InvalidDefinition(_)
            | EngineError::InvalidCron { .. }
            | EngineError::InvalidTimezone(_)
            | EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidState(_) | EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
            EngineError::Webhook(rejection) => match rejection {
                WebhookRejection::NotFound => StatusCode::NOT_FOUND,
                WebhookRejection::Disabled | WebhookRejection::Forbidden => StatusCode::FORBIDDEN,
                WebhookRejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
                WebhookRejection::Unauthorized => StatusCode::UNAUTHORIZED,
                WebhookRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                WebhookRejection::WorkflowInactive => StatusCode::CONFLICT,
            },
            EngineError::Database(db::DbError::NotFound) => StatusCode::NOT_FOUND,
            EngineError::Database(db::DbError::Conflict(_)) => StatusCode::CONFLICT,
            EngineError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Database(_) | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
