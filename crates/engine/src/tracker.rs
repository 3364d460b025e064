//! Execution Tracker.
//!
//! Progress of a run is a sequence of [`TrackerEvent`]s. The execution row
//! and its step rows are derived by applying each event in turn
//! ([`ExecutionState::apply`]); counts and `current_node_id` are never
//! written independently. Every recorded event is persisted and then fanned
//! out to live viewers through the [`ExecutionHub`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus, ExecutionStepRow, StepStatus};
use db::Store;
use nodes::{NodeEvent, NodeEventEnvelope};

use crate::hub::{ExecutionHub, LiveMessage, LiveMessageType};
use crate::EngineError;

/// Failure details surfaced on the execution row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub message: String,
    pub node_id: Option<String>,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    RunStarted {
        at: DateTime<Utc>,
        /// `{"trigger", "variables", "nodes"}` at the start of the run.
        context: Value,
    },
    StepStarted {
        step_id: Uuid,
        node_id: String,
        node_type: String,
        node_name: String,
        input: Value,
        at: DateTime<Utc>,
    },
    StepCompleted {
        step_id: Uuid,
        output: Value,
        attempts: u32,
        at: DateTime<Utc>,
    },
    StepFailed {
        step_id: Uuid,
        error_message: String,
        error_type: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    StepSkipped {
        step_id: Uuid,
        node_id: String,
        node_type: String,
        node_name: String,
        input: Value,
        /// Data handed downstream by a disabled node.
        passthrough: Option<Value>,
        at: DateTime<Utc>,
    },
    /// A node error that did not end the run yet (goto_error_handler).
    ErrorRecorded { error: RunError },
    RunFinished {
        status: ExecutionStatus,
        output: Option<Value>,
        /// `None` keeps a previously recorded error.
        error: Option<RunError>,
        at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

/// Derived view of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution: ExecutionRow,
    /// Every step row, historical ones included, in `step_order`.
    pub steps: Vec<ExecutionStepRow>,
    by_id: HashMap<Uuid, usize>,
    /// node_id -> index of the step that currently speaks for the node
    latest_by_node: HashMap<String, usize>,
}

impl ExecutionState {
    /// Start from persisted rows. Only steps of nodes accepted by `counted`
    /// contribute to the derived counts; the rest are history of nodes that
    /// are about to run again.
    pub fn new(
        execution: ExecutionRow,
        mut steps: Vec<ExecutionStepRow>,
        counted: impl Fn(&str) -> bool,
    ) -> Self {
        steps.sort_by_key(|s| s.step_order);
        let by_id = steps.iter().enumerate().map(|(i, s)| (s.id, i)).collect();
        let latest_by_node = steps
            .iter()
            .enumerate()
            .filter(|(_, s)| counted(&s.node_id))
            .map(|(i, s)| (s.node_id.clone(), i))
            .collect();
        let mut state = Self {
            execution,
            steps,
            by_id,
            latest_by_node,
        };
        state.recount();
        state
    }

    /// Apply one event. Returns the index of the step it touched.
    pub fn apply(&mut self, event: &TrackerEvent) -> Option<usize> {
        let touched = match event {
            TrackerEvent::RunStarted { at, context } => {
                let row = &mut self.execution;
                row.status = ExecutionStatus::Running.as_str().into();
                row.started_at = Some(*at);
                row.completed_at = None;
                row.duration_ms = None;
                row.output_data = None;
                row.error_message = None;
                row.error_node_id = None;
                row.error_stack = None;
                row.execution_context = context.clone();
                None
            }
            TrackerEvent::StepStarted {
                step_id,
                node_id,
                node_type,
                node_name,
                input,
                at,
            } => Some(self.push_step(ExecutionStepRow {
                id: *step_id,
                execution_id: self.execution.id,
                node_id: node_id.clone(),
                node_type: node_type.clone(),
                node_name: node_name.clone(),
                step_order: self.next_step_order(),
                status: StepStatus::Running.as_str().into(),
                attempts: 1,
                input: input.clone(),
                output: None,
                error_message: None,
                error_type: None,
                duration_ms: None,
                started_at: *at,
                completed_at: None,
            })),
            TrackerEvent::StepCompleted {
                step_id,
                output,
                attempts,
                at,
            } => {
                let idx = self.finish_step(*step_id, StepStatus::Completed, *attempts, *at)?;
                self.steps[idx].output = Some(output.clone());
                let node_id = self.steps[idx].node_id.clone();
                self.record_node_output(&node_id, output.clone());
                Some(idx)
            }
            TrackerEvent::StepFailed {
                step_id,
                error_message,
                error_type,
                attempts,
                at,
            } => {
                let idx = self.finish_step(*step_id, StepStatus::Failed, *attempts, *at)?;
                self.steps[idx].error_message = Some(error_message.clone());
                self.steps[idx].error_type = Some(error_type.clone());
                Some(idx)
            }
            TrackerEvent::StepSkipped {
                step_id,
                node_id,
                node_type,
                node_name,
                input,
                passthrough,
                at,
            } => {
                if let Some(data) = passthrough {
                    self.record_node_output(node_id, data.clone());
                }
                Some(self.push_step(ExecutionStepRow {
                    id: *step_id,
                    execution_id: self.execution.id,
                    node_id: node_id.clone(),
                    node_type: node_type.clone(),
                    node_name: node_name.clone(),
                    step_order: self.next_step_order(),
                    status: StepStatus::Skipped.as_str().into(),
                    attempts: 0,
                    input: input.clone(),
                    output: passthrough.clone(),
                    error_message: None,
                    error_type: None,
                    duration_ms: Some(0),
                    started_at: *at,
                    completed_at: Some(*at),
                }))
            }
            TrackerEvent::ErrorRecorded { error } => {
                self.set_error(error);
                None
            }
            TrackerEvent::RunFinished {
                status,
                output,
                error,
                at,
            } => {
                let row = &mut self.execution;
                row.status = status.as_str().into();
                row.output_data = output.clone();
                row.completed_at = Some(*at);
                row.duration_ms = row.started_at.map(|s| (*at - s).num_milliseconds().max(0));
                if let Some(error) = error {
                    self.set_error(error);
                }
                None
            }
        };
        self.recount();
        touched
    }

    fn set_error(&mut self, error: &RunError) {
        self.execution.error_message = Some(error.message.clone());
        self.execution.error_node_id = error.node_id.clone();
        self.execution.error_stack = error.stack.clone();
    }

    fn next_step_order(&self) -> i32 {
        self.steps.iter().map(|s| s.step_order).max().unwrap_or(0) + 1
    }

    fn push_step(&mut self, step: ExecutionStepRow) -> usize {
        let idx = self.steps.len();
        self.execution.execution_path.push(step.node_id.clone());
        self.by_id.insert(step.id, idx);
        self.latest_by_node.insert(step.node_id.clone(), idx);
        self.steps.push(step);
        idx
    }

    fn finish_step(
        &mut self,
        step_id: Uuid,
        status: StepStatus,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Option<usize> {
        let idx = *self.by_id.get(&step_id)?;
        let step = &mut self.steps[idx];
        step.status = status.as_str().into();
        step.attempts = attempts as i32;
        step.completed_at = Some(at);
        step.duration_ms = Some((at - step.started_at).num_milliseconds().max(0));
        Some(idx)
    }

    fn record_node_output(&mut self, node_id: &str, output: Value) {
        let ctx = &mut self.execution.execution_context;
        if !ctx.is_object() {
            *ctx = json!({});
        }
        if let Some(obj) = ctx.as_object_mut() {
            let nodes = obj
                .entry("nodes")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(nodes) = nodes.as_object_mut() {
                nodes.insert(node_id.to_owned(), output);
            }
        }
    }

    fn recount(&mut self) {
        let (mut completed, mut failed, mut skipped) = (0, 0, 0);
        let mut current: Option<&ExecutionStepRow> = None;
        for &idx in self.latest_by_node.values() {
            let step = &self.steps[idx];
            match step.status.as_str() {
                "completed" => completed += 1,
                "failed" => failed += 1,
                "skipped" => skipped += 1,
                _ => {
                    if current.map_or(true, |c| c.step_order < step.step_order) {
                        current = Some(step);
                    }
                }
            }
        }
        let current = current.map(|s| s.node_id.clone());
        let row = &mut self.execution;
        row.completed_nodes = completed;
        row.failed_nodes = failed;
        row.skipped_nodes = skipped;
        row.current_node_id = current;
    }

    /// The step currently representing `node_id`, if any.
    pub fn latest_step(&self, node_id: &str) -> Option<&ExecutionStepRow> {
        self.latest_by_node.get(node_id).map(|&i| &self.steps[i])
    }

    pub fn step(&self, step_id: Uuid) -> Option<&ExecutionStepRow> {
        self.by_id.get(&step_id).map(|&i| &self.steps[i])
    }
}

// ---------------------------------------------------------------------------
// RunTracker
// ---------------------------------------------------------------------------

/// Records one run: apply, persist, publish.
pub struct RunTracker {
    store: Arc<dyn Store>,
    hub: ExecutionHub,
    state: ExecutionState,
}

impl RunTracker {
    pub fn new(store: Arc<dyn Store>, hub: ExecutionHub, state: ExecutionState) -> Self {
        Self {
            store,
            hub,
            state,
        }
    }

    /// Apply `event`, persist the result and publish it.
    ///
    /// A run never starts over a row that already finished, e.g. one
    /// stopped while it sat in the queue.
    pub async fn record(&mut self, event: TrackerEvent) -> Result<(), EngineError> {
        if matches!(event, TrackerEvent::RunStarted { .. }) {
            let stored = self.store.get_execution(self.state.execution.id).await?;
            if stored.status.parse::<ExecutionStatus>().is_ok_and(|s| s.is_terminal()) {
                return Err(EngineError::InvalidState(format!(
                    "execution {} is already {}",
                    stored.human_id, stored.status
                )));
            }
        }

        let touched = self.state.apply(&event);
        if let Some(idx) = touched {
            self.store.upsert_step(&self.state.steps[idx]).await?;
        }
        self.store.update_execution(&self.state.execution).await?;

        if let Some(message) = self.live_message(&event, touched) {
            self.hub.publish(message).await;
        }
        Ok(())
    }

    /// Forward a node's console or screen output to live viewers.
    pub async fn relay(&self, envelope: NodeEventEnvelope) {
        let (kind, payload) = match envelope.event {
            NodeEvent::Console { level, message } => (
                LiveMessageType::Console,
                json!({"node_id": envelope.node_id, "level": level, "message": message}),
            ),
            NodeEvent::Screen { payload } => (
                LiveMessageType::ScreenUpdate,
                json!({"node_id": envelope.node_id, "screen": payload}),
            ),
        };
        self.hub
            .publish(LiveMessage::new(
                kind,
                self.state.execution.id,
                Some(envelope.step_id),
                payload,
            ))
            .await;
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn into_execution(self) -> ExecutionRow {
        self.state.execution
    }

    fn live_message(&self, event: &TrackerEvent, touched: Option<usize>) -> Option<LiveMessage> {
        let execution = &self.state.execution;
        let step = touched.map(|i| &self.state.steps[i]);
        let (kind, payload) = match event {
            TrackerEvent::StepStarted { .. } => {
                let step = step?;
                (
                    LiveMessageType::StepStarted,
                    json!({
                        "node_id": step.node_id,
                        "node_type": step.node_type,
                        "node_name": step.node_name,
                        "step_order": step.step_order,
                    }),
                )
            }
            TrackerEvent::StepCompleted { .. } | TrackerEvent::StepSkipped { .. } => {
                let step = step?;
                (
                    LiveMessageType::StepCompleted,
                    json!({
                        "node_id": step.node_id,
                        "status": step.status,
                        "output": step.output,
                        "attempts": step.attempts,
                        "duration_ms": step.duration_ms,
                    }),
                )
            }
            TrackerEvent::StepFailed { .. } => {
                let step = step?;
                (
                    LiveMessageType::StepFailed,
                    json!({
                        "node_id": step.node_id,
                        "error": step.error_message,
                        "error_type": step.error_type,
                        "attempts": step.attempts,
                        "duration_ms": step.duration_ms,
                    }),
                )
            }
            TrackerEvent::RunFinished { .. } => return Some(final_message(execution)),
            TrackerEvent::RunStarted { .. } | TrackerEvent::ErrorRecorded { .. } => return None,
        };
        Some(LiveMessage::new(kind, execution.id, step.map(|s| s.id), payload))
    }
}

/// The `executionCompleted`/`executionFailed` summary of a finished run.
pub fn final_message(execution: &ExecutionRow) -> LiveMessage {
    let kind = if execution.status == ExecutionStatus::Completed.as_str() {
        LiveMessageType::ExecutionCompleted
    } else {
        LiveMessageType::ExecutionFailed
    };
    LiveMessage::new(
        kind,
        execution.id,
        None,
        json!({
            "status": execution.status,
            "output": execution.output_data,
            "error_message": execution.error_message,
            "error_node_id": execution.error_node_id,
            "duration_ms": execution.duration_ms,
            "completed_nodes": execution.completed_nodes,
            "failed_nodes": execution.failed_nodes,
            "skipped_nodes": execution.skipped_nodes,
            "total_nodes": execution.total_nodes,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution_row(total_nodes: i32) -> ExecutionRow {
        ExecutionRow {
            id: Uuid::new_v4(),
            human_id: "EX-TEST0001".into(),
            workflow_id: Uuid::new_v4(),
            workflow_version: 1,
            status: "queued".into(),
            trigger_source: "manual".into(),
            trigger_data: json!({}),
            input_data: json!({}),
            output_data: None,
            execution_path: vec![],
            current_node_id: None,
            total_nodes,
            completed_nodes: 0,
            failed_nodes: 0,
            skipped_nodes: 0,
            error_message: None,
            error_node_id: None,
            error_stack: None,
            retry_count: 0,
            duration_ms: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            triggered_by: None,
            execution_context: json!({}),
            notes: None,
        }
    }

    fn started(step_id: Uuid, node: &str) -> TrackerEvent {
        TrackerEvent::StepStarted {
            step_id,
            node_id: node.into(),
            node_type: "mock".into(),
            node_name: node.into(),
            input: json!({}),
            at: Utc::now(),
        }
    }

    #[test]
    fn applied_events_derive_counts_path_and_current_node() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let events = vec![
            TrackerEvent::RunStarted { at: Utc::now(), context: json!({"nodes": {}}) },
            started(a, "a"),
            TrackerEvent::StepCompleted { step_id: a, output: json!({"x": 1}), attempts: 1, at: Utc::now() },
            started(b, "b"),
            TrackerEvent::StepFailed {
                step_id: b,
                error_message: "boom".into(),
                error_type: "fatal".into(),
                attempts: 1,
                at: Utc::now(),
            },
            TrackerEvent::StepSkipped {
                step_id: c,
                node_id: "c".into(),
                node_type: "mock".into(),
                node_name: "c".into(),
                input: json!({}),
                passthrough: None,
                at: Utc::now(),
            },
        ];

        let mut state = ExecutionState::new(execution_row(3), vec![], |_| true);
        let mut last_total = 0;
        for event in &events {
            state.apply(event);
            let row = &state.execution;
            let total = row.completed_nodes + row.failed_nodes + row.skipped_nodes;
            assert!(total <= row.total_nodes);
            assert!(total >= last_total);
            last_total = total;
        }

        let row = &state.execution;
        assert_eq!((row.completed_nodes, row.failed_nodes, row.skipped_nodes), (1, 1, 1));
        assert_eq!(row.execution_path, vec!["a", "b", "c"]);
        assert_eq!(row.current_node_id, None);
        assert_eq!(row.execution_context["nodes"]["a"]["x"], 1);
        let orders: Vec<i32> = state.steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn current_node_is_latest_running_step() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut state = ExecutionState::new(execution_row(2), vec![], |_| true);
        state.apply(&started(a, "a"));
        state.apply(&started(b, "b"));
        assert_eq!(state.execution.current_node_id.as_deref(), Some("b"));
        state.apply(&TrackerEvent::StepCompleted { step_id: b, output: json!({}), attempts: 1, at: Utc::now() });
        assert_eq!(state.execution.current_node_id.as_deref(), Some("a"));
    }

    #[test]
    fn uncounted_history_is_replaced_by_new_steps() {
        let old = Uuid::new_v4();
        let mut seed = ExecutionState::new(execution_row(1), vec![], |_| true);
        seed.apply(&started(old, "a"));
        seed.apply(&TrackerEvent::StepFailed {
            step_id: old,
            error_message: "x".into(),
            error_type: "retryable".into(),
            attempts: 3,
            at: Utc::now(),
        });
        let (row, steps) = (seed.execution.clone(), seed.steps.clone());
        assert_eq!(row.failed_nodes, 1);

        let mut resumed = ExecutionState::new(row, steps, |node| node != "a");
        assert_eq!(resumed.execution.failed_nodes, 0);

        let new = Uuid::new_v4();
        resumed.apply(&started(new, "a"));
        resumed.apply(&TrackerEvent::StepCompleted { step_id: new, output: json!({}), attempts: 1, at: Utc::now() });
        assert_eq!(resumed.execution.completed_nodes, 1);
        assert_eq!(resumed.execution.failed_nodes, 0);
        assert_eq!(resumed.steps.len(), 2);
        assert_eq!(resumed.latest_step("a").map(|s| s.id), Some(new));
    }

    #[test]
    fn finish_keeps_recorded_error_when_none_given() {
        let mut state = ExecutionState::new(execution_row(1), vec![], |_| true);
        state.apply(&TrackerEvent::RunStarted { at: Utc::now(), context: json!({}) });
        state.apply(&TrackerEvent::ErrorRecorded {
            error: RunError { message: "b failed".into(), node_id: Some("b".into()), stack: None },
        });
        state.apply(&TrackerEvent::RunFinished {
            status: ExecutionStatus::Completed,
            output: None,
            error: None,
            at: Utc::now(),
        });
        assert_eq!(state.execution.status, "completed");
        assert_eq!(state.execution.error_node_id.as_deref(), Some("b"));
        assert!(state.execution.duration_ms.is_some());
    }

    #[tokio::test]
    async fn a_finished_row_is_never_restarted() {
        let store = Arc::new(db::MemoryStore::new());
        let mut row = execution_row(1);
        row.status = "stopped".into();
        store.insert_execution(&row).await.unwrap();

        let state = ExecutionState::new(row.clone(), vec![], |_| true);
        let mut tracker = RunTracker::new(store.clone(), ExecutionHub::new(), state);
        let err = tracker
            .record(TrackerEvent::RunStarted { at: Utc::now(), context: json!({}) })
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvalidState(_)));
        let stored = store.get_execution(row.id).await.unwrap();
        assert_eq!(stored.status, "stopped");
        assert!(stored.started_at.is_none());
    }
}
