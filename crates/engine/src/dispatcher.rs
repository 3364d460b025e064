//! Trigger Dispatcher.
//!
//! Every way of starting a workflow ends here: the dispatcher pins the
//! workflow's current version, writes a `queued` execution row and hands the
//! id to the worker pool. It also owns the execution-level control
//! operations (stop, retry, wait, startup recovery).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus, StepStatus, TriggerType, WorkflowStatus};
use db::Store;
use queue::{Job, JobQueue};

use crate::hub::{ExecutionHub, LiveMessage, LiveMessageType};
use crate::models::WorkflowDefinition;
use crate::scheduler::ScheduleLedger;
use crate::EngineError;

/// One request to start a workflow.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub source: TriggerType,
    pub trigger_data: Value,
    pub input_data: Value,
    pub triggered_by: Option<String>,
    pub notes: Option<String>,
}

impl TriggerRequest {
    pub fn new(source: TriggerType, trigger_data: Value, input_data: Value) -> Self {
        Self {
            source,
            trigger_data,
            input_data,
            triggered_by: None,
            notes: None,
        }
    }

    /// A manual run; the input doubles as trigger data.
    pub fn manual(input_data: Value) -> Self {
        Self::new(TriggerType::Manual, json!({ "input": input_data }), input_data)
    }
}

/// `EX-` followed by eight upper-case hex digits.
pub(crate) fn human_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", hex[..8].to_uppercase())
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: JobQueue,
    hub: ExecutionHub,
    schedules: ScheduleLedger,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, queue: JobQueue, hub: ExecutionHub, schedules: ScheduleLedger) -> Self {
        Self {
            store,
            queue,
            hub,
            schedules,
        }
    }

    /// Create an execution pinned to the workflow's current version and
    /// queue it.
    ///
    /// Manual runs are accepted for any workflow that is not archived; every
    /// other source requires the workflow to be `active`.
    #[instrument(skip(self, request), fields(source = %request.source))]
    pub async fn dispatch(&self, workflow_id: Uuid, request: TriggerRequest) -> Result<ExecutionRow, EngineError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await
            .map_err(EngineError::lookup("workflow"))?;

        let status = WorkflowStatus::from_str(&workflow.status).map_err(EngineError::InvalidState)?;
        let allowed = match request.source {
            TriggerType::Manual => status != WorkflowStatus::Archived,
            _ => status == WorkflowStatus::Active,
        };
        if !allowed {
            return Err(EngineError::InvalidState(format!(
                "workflow '{}' is {} and cannot be triggered by {}",
                workflow.name, workflow.status, request.source
            )));
        }

        let version = self
            .store
            .get_workflow_version(workflow.id, workflow.version)
            .await
            .map_err(EngineError::lookup("workflow version"))?;
        let total_nodes = WorkflowDefinition::from_value(&version.definition)?.nodes.len();

        let now = Utc::now();
        let execution = ExecutionRow {
            id: Uuid::new_v4(),
            human_id: human_id("EX"),
            workflow_id: workflow.id,
            workflow_version: version.version,
            status: ExecutionStatus::Queued.as_str().into(),
            trigger_source: request.source.as_str().into(),
            trigger_data: request.trigger_data,
            input_data: request.input_data,
            output_data: None,
            execution_path: Vec::new(),
            current_node_id: None,
            total_nodes: i32::try_from(total_nodes).unwrap_or(i32::MAX),
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
            created_at: now,
            triggered_by: request.triggered_by,
            execution_context: json!({}),
            notes: request.notes,
        };
        self.store.insert_execution(&execution).await?;
        self.enqueue(&execution, Job::start(execution.id)).await?;

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            version = execution.workflow_version,
            "execution queued"
        );
        Ok(execution)
    }

    /// Request a stop. Queued executions stop immediately; running ones stop
    /// at the next node boundary.
    #[instrument(skip(self))]
    pub async fn stop(&self, execution_id: Uuid) -> Result<ExecutionRow, EngineError> {
        let execution = self.get(execution_id).await?;
        if execution.status == ExecutionStatus::Queued.as_str() {
            let stopped = self
                .store
                .claim_execution(execution_id, ExecutionStatus::Queued.as_str(), ExecutionStatus::Stopped.as_str())
                .await?;
            if stopped {
                return self.mark_stopped(execution).await;
            }
            // A worker claimed it in the meantime.
            let execution = self.get(execution_id).await?;
            return self.stop_running(execution).await;
        }
        self.stop_running(execution).await
    }

    async fn stop_running(&self, execution: ExecutionRow) -> Result<ExecutionRow, EngineError> {
        let status = ExecutionStatus::from_str(&execution.status).map_err(EngineError::InvalidState)?;
        if status != ExecutionStatus::Running {
            return Err(EngineError::InvalidState(format!(
                "execution {} is already {status}",
                execution.human_id
            )));
        }
        if self.hub.request_stop(execution.id).await {
            info!("stop requested");
            Ok(execution)
        } else {
            // Not owned by this process; nothing will ever finish it.
            warn!("running execution has no live executor, marking stopped");
            self.mark_stopped(execution).await
        }
    }

    /// Re-queue a failed or stopped execution. The run resumes from the
    /// failed node; earlier successful steps are kept.
    #[instrument(skip(self))]
    pub async fn retry(&self, execution_id: Uuid) -> Result<ExecutionRow, EngineError> {
        let mut execution = self.get(execution_id).await?;
        let status = ExecutionStatus::from_str(&execution.status).map_err(EngineError::InvalidState)?;
        if !matches!(status, ExecutionStatus::Failed | ExecutionStatus::Stopped) {
            return Err(EngineError::InvalidState(format!(
                "only failed or stopped executions can be retried; {} is {status}",
                execution.human_id
            )));
        }

        execution.status = ExecutionStatus::Queued.as_str().into();
        execution.retry_count += 1;
        execution.output_data = None;
        execution.error_message = None;
        execution.error_node_id = None;
        execution.error_stack = None;
        execution.completed_at = None;
        execution.duration_ms = None;
        self.store.update_execution(&execution).await?;
        self.enqueue(&execution, Job::resume(execution.id)).await?;

        info!(retry_count = execution.retry_count, "execution re-queued");
        Ok(execution)
    }

    /// Wait until the execution reaches a terminal status or `timeout`
    /// elapses, and return its latest row either way.
    pub async fn wait_for_completion(&self, execution_id: Uuid, timeout: Duration) -> Result<ExecutionRow, EngineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut rx = self.hub.subscribe(execution_id).await;
            let execution = self.get(execution_id).await?;
            if is_terminal(&execution) {
                self.hub.release(execution_id).await;
                return Ok(execution);
            }

            loop {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Ok(message)) if message.kind.is_final() => break,
                    Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
                    Ok(Err(RecvError::Closed)) => break,
                    Err(_) => {
                        drop(rx);
                        self.hub.release(execution_id).await;
                        return self.get(execution_id).await;
                    }
                }
            }
        }
    }

    /// Re-queue executions left `queued` by a previous process and fail the
    /// ones it left `running`. Returns how many rows were touched.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let pending = self
            .store
            .list_executions_by_status(&[ExecutionStatus::Queued.as_str(), ExecutionStatus::Running.as_str()])
            .await?;
        let touched = pending.len();

        for mut execution in pending {
            if execution.status == ExecutionStatus::Queued.as_str() {
                self.queue.enqueue(Job::resume(execution.id))?;
                continue;
            }

            let now = Utc::now();
            for mut step in self.store.list_steps(execution.id).await? {
                if step.status == StepStatus::Running.as_str() {
                    step.status = StepStatus::Failed.as_str().into();
                    step.error_message = Some("interrupted by restart".into());
                    step.error_type = Some("fatal".into());
                    step.completed_at = Some(now);
                    step.duration_ms = Some((now - step.started_at).num_milliseconds().max(0));
                    self.store.upsert_step(&step).await?;
                }
            }
            execution.status = ExecutionStatus::Failed.as_str().into();
            execution.error_message = Some("interrupted by restart".into());
            execution.current_node_id = None;
            execution.completed_at = Some(now);
            execution.duration_ms = execution.started_at.map(|s| (now - s).num_milliseconds().max(0));
            self.store.update_execution(&execution).await?;
            warn!(execution_id = %execution.id, "failed execution interrupted by restart");
            self.record_schedule_outcome(&execution, ExecutionStatus::Failed).await?;
        }

        if touched > 0 {
            info!(touched, "recovered unfinished executions");
        }
        Ok(touched)
    }

    async fn get(&self, execution_id: Uuid) -> Result<ExecutionRow, EngineError> {
        self.store
            .get_execution(execution_id)
            .await
            .map_err(EngineError::lookup("execution"))
    }

    async fn enqueue(&self, execution: &ExecutionRow, job: Job) -> Result<(), EngineError> {
        if let Err(err) = self.queue.enqueue(job) {
            let mut failed = execution.clone();
            failed.status = ExecutionStatus::Failed.as_str().into();
            failed.error_message = Some(err.to_string());
            failed.completed_at = Some(Utc::now());
            self.store.update_execution(&failed).await?;
            return Err(err.into());
        }
        Ok(())
    }

    async fn mark_stopped(&self, mut execution: ExecutionRow) -> Result<ExecutionRow, EngineError> {
        let now = Utc::now();
        execution.status = ExecutionStatus::Stopped.as_str().into();
        execution.current_node_id = None;
        execution.completed_at = Some(now);
        execution.duration_ms = execution.started_at.map(|s| (now - s).num_milliseconds().max(0));
        self.store.update_execution(&execution).await?;

        self.hub
            .publish(LiveMessage::new(
                LiveMessageType::ExecutionFailed,
                execution.id,
                None,
                json!({ "status": execution.status, "error_message": execution.error_message }),
            ))
            .await;
        self.hub.close(execution.id).await;
        info!(execution_id = %execution.id, "execution stopped");
        self.record_schedule_outcome(&execution, ExecutionStatus::Stopped).await?;
        Ok(execution)
    }

    async fn record_schedule_outcome(&self, execution: &ExecutionRow, status: ExecutionStatus) -> Result<(), EngineError> {
        if execution.trigger_source != TriggerType::Schedule.as_str() {
            return Ok(());
        }
        self.schedules.record(execution.workflow_id, status).await
    }
}

fn is_terminal(execution: &ExecutionRow) -> bool {
    ExecutionStatus::from_str(&execution.status).is_ok_and(|s| s.is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_ids_are_prefixed_hex() {
        let id = human_id("EX");
        assert_eq!(id.len(), 11);
        assert!(id.starts_with("EX-"));
        assert!(id[3..].chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn manual_requests_carry_input_as_trigger_data() {
        let request = TriggerRequest::manual(json!({"n": 1}));
        assert_eq!(request.source, TriggerType::Manual);
        assert_eq!(request.trigger_data["input"]["n"], 1);
        assert_eq!(request.input_data["n"], 1);
    }
}
