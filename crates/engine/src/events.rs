//! In-process event bus and the listener that starts event-triggered
//! workflows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use db::models::{TriggerType, WorkflowStatus};
use db::Store;

use crate::dispatcher::{Dispatcher, TriggerRequest};
use crate::models::TriggerConfig;
use crate::EngineError;

const BUS_CAPACITY: usize = 1024;

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            source: None,
            occurred_at: Utc::now(),
        }
    }
}

/// Broadcast fan-out of [`Event`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(BUS_CAPACITY).0,
        }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: Event) -> usize {
        debug!(event_type = %event.event_type, "event published");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

/// Starts every active event-triggered workflow subscribed to an event.
#[derive(Clone)]
pub struct EventTriggerListener {
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
}

impl EventTriggerListener {
    pub fn new(store: Arc<dyn Store>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Dispatch `event` to its subscribers; returns the execution ids.
    pub async fn handle(&self, event: &Event) -> Result<Vec<Uuid>, EngineError> {
        let candidates = self
            .store
            .list_workflows_by_trigger(TriggerType::Event.as_str(), WorkflowStatus::Active.as_str())
            .await?;

        let mut started = Vec::new();
        for workflow in candidates {
            let config: TriggerConfig = match serde_json::from_value(workflow.trigger_config.clone()) {
                Ok(config) => config,
                Err(err) => {
                    warn!(workflow_id = %workflow.id, error = %err, "unreadable trigger_config");
                    continue;
                }
            };
            if !config.subscribes_to(&event.event_type) {
                continue;
            }

            let mut request = TriggerRequest::new(
                TriggerType::Event,
                json!({
                    "event_id": event.id,
                    "event_type": event.event_type,
                    "payload": event.payload,
                    "source": event.source,
                    "occurred_at": event.occurred_at,
                }),
                event.payload.clone(),
            );
            request.triggered_by = Some(format!("event:{}", event.event_type));
            match self.dispatcher.dispatch(workflow.id, request).await {
                Ok(execution) => started.push(execution.id),
                Err(err) => warn!(workflow_id = %workflow.id, error = %err, "event dispatch failed"),
            }
        }

        info!(event_type = %event.event_type, started = started.len(), "event handled");
        Ok(started)
    }

    /// Consume a bus subscription until the bus closes.
    pub async fn run(self, mut rx: broadcast::Receiver<Event>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(err) = self.handle(&event).await {
                        warn!(event_type = %event.event_type, error = %err, "event handling failed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_fans_out_to_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(Event::new("order.created", json!({"id": 1}))), 2);
        assert_eq!(a.recv().await.unwrap().event_type, "order.created");
        assert_eq!(b.recv().await.unwrap().payload["id"], 1);
    }

    #[test]
    fn publishing_without_subscribers_is_not_an_error() {
        assert_eq!(EventBus::new().publish(Event::new("x", json!(null))), 0);
    }
}
