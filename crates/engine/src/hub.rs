//! Live fan-out of execution progress and the cooperative cancellation
//! registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// Message types pushed to live-preview clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiveMessageType {
    ScreenUpdate,
    StepStarted,
    StepCompleted,
    StepFailed,
    Console,
    ExecutionCompleted,
    ExecutionFailed,
}

impl LiveMessageType {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::ExecutionCompleted | Self::ExecutionFailed)
    }
}

/// One WebSocket frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub kind: LiveMessageType,
    pub execution_run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl LiveMessage {
    pub fn new(kind: LiveMessageType, execution_run_id: Uuid, step_id: Option<Uuid>, payload: Value) -> Self {
        Self {
            kind,
            execution_run_id,
            step_id,
            payload,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<LiveMessage>>>,
    cancellations: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

/// Shared, cloneable registry keyed by execution id.
#[derive(Clone, Default)]
pub struct ExecutionHub {
    inner: Arc<HubInner>,
}

impl ExecutionHub {
    pub fn new() -> Self {
        Self::default()
    }

    // ------ live messages ------

    /// Subscribe to an execution's messages. Subscribing before the run
    /// starts is fine.
    pub async fn subscribe(&self, execution_id: Uuid) -> broadcast::Receiver<LiveMessage> {
        self.inner
            .channels
            .lock()
            .await
            .entry(execution_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver to current subscribers; a no-op when nobody listens.
    pub async fn publish(&self, message: LiveMessage) {
        if let Some(tx) = self.inner.channels.lock().await.get(&message.execution_run_id) {
            let _ = tx.send(message);
        }
    }

    /// Drop the channel once it has no receivers left.
    pub async fn release(&self, execution_id: Uuid) {
        let mut channels = self.inner.channels.lock().await;
        if channels.get(&execution_id).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(&execution_id);
        }
    }

    /// Close the channel; subscribers drain buffered messages and then see
    /// the stream end.
    pub async fn close(&self, execution_id: Uuid) {
        self.inner.channels.lock().await.remove(&execution_id);
    }

    // ------ cancellation ------

    /// Register a running execution and return its stop flag. Registering
    /// twice returns the same flag, so a stop requested in between is kept.
    pub async fn register(&self, execution_id: Uuid) -> Arc<AtomicBool> {
        self.inner
            .cancellations
            .lock()
            .await
            .entry(execution_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Request a cooperative stop. Returns false when the execution is not
    /// running in this process.
    pub async fn request_stop(&self, execution_id: Uuid) -> bool {
        match self.inner.cancellations.lock().await.get(&execution_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn unregister(&self, execution_id: Uuid) {
        self.inner.cancellations.lock().await.remove(&execution_id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_messages_until_close() {
        let hub = ExecutionHub::new();
        let id = Uuid::new_v4();
        let mut rx = hub.subscribe(id).await;

        hub.publish(LiveMessage::new(LiveMessageType::Console, id, None, json!({"message": "hi"})))
            .await;
        hub.close(id).await;

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.kind, LiveMessageType::Console);
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn message_serialises_with_camel_case_type() {
        let id = Uuid::nil();
        let msg = LiveMessage::new(LiveMessageType::StepStarted, id, None, json!({}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "stepStarted");
        assert!(value.get("step_id").is_none());
        assert_eq!(value["execution_run_id"], json!(id));
    }

    #[tokio::test]
    async fn stop_requests_flip_registered_flags_only() {
        let hub = ExecutionHub::new();
        let id = Uuid::new_v4();
        assert!(!hub.request_stop(id).await);

        let flag = hub.register(id).await;
        assert!(hub.request_stop(id).await);
        assert!(flag.load(Ordering::SeqCst));

        hub.unregister(id).await;
        assert!(!hub.request_stop(id).await);
    }

    #[tokio::test]
    async fn registering_again_keeps_a_pending_stop() {
        let hub = ExecutionHub::new();
        let id = Uuid::new_v4();
        hub.register(id).await;
        assert!(hub.request_stop(id).await);

        let flag = hub.register(id).await;
        assert!(flag.load(Ordering::SeqCst));
    }
}
