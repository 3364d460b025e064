use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus};
use db::Store;
use engine::tracker::final_message;
use engine::{EngineError, LiveMessage};

use crate::{ApiError, AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/workflows/ws/:execution_id", get(live_ws))
}

pub(crate) async fn live_ws(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // Subscribe before reading the row so nothing published in between is lost.
    let rx = state.engine.hub().subscribe(execution_id).await;
    let execution = match state.engine.store().get_execution(execution_id).await {
        Ok(execution) => execution,
        Err(err) => {
            drop(rx);
            state.engine.hub().release(execution_id).await;
            return Err(match err {
                db::DbError::NotFound => EngineError::NotFound("execution".into()),
                other => other.into(),
            }
            .into());
        }
    };
    Ok(ws.on_upgrade(move |socket| stream_execution(socket, state, execution, rx)))
}

async fn stream_execution(
    mut socket: WebSocket,
    state: AppState,
    execution: ExecutionRow,
    mut rx: broadcast::Receiver<LiveMessage>,
) {
    let execution_id = execution.id;
    tracing::info!(%execution_id, "live viewer connected");

    let finished = execution
        .status
        .parse::<ExecutionStatus>()
        .is_ok_and(|status| status.is_terminal());
    if finished {
        let _ = send(&mut socket, &final_message(&execution)).await;
    } else {
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(message) => {
                        let last = message.kind.is_final();
                        if send(&mut socket, &message).await.is_err() || last {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(%execution_id, skipped, "live viewer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    drop(rx);
    state.engine.hub().release(execution_id).await;
    tracing::info!(%execution_id, "live viewer disconnected");
}

async fn send(socket: &mut WebSocket, message: &LiveMessage) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}
