//! Queue consumer: turns a [`Job`] into one executor run.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use db::models::{ExecutionRow, ExecutionStatus, TriggerType};
use db::Store;
use queue::{Job, JobHandler, JobKind, QueueError};

use crate::executor::WorkflowExecutor;
use crate::models::PinnedWorkflow;
use crate::notify::Notifier;
use crate::scheduler::ScheduleLedger;
use crate::EngineError;

/// Runs queued executions against their pinned workflow version.
pub struct ExecutionWorker {
    store: Arc<dyn Store>,
    executor: WorkflowExecutor,
    notifier: Arc<dyn Notifier>,
    schedules: ScheduleLedger,
}

impl ExecutionWorker {
    pub fn new(
        store: Arc<dyn Store>,
        executor: WorkflowExecutor,
        notifier: Arc<dyn Notifier>,
        schedules: ScheduleLedger,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
            schedules,
        }
    }

    #[instrument(skip_all, fields(execution_id = %job.execution_id, kind = ?job.kind))]
    async fn process(&self, job: Job) -> Result<(), EngineError> {
        let mut execution = self
            .store
            .get_execution(job.execution_id)
            .await
            .map_err(EngineError::lookup("execution"))?;
        if execution.status != ExecutionStatus::Queued.as_str() {
            // Stopped while waiting in the queue, or picked up twice.
            info!(status = %execution.status, "execution no longer queued, skipping");
            return Ok(());
        }

        // Register before claiming: once the row reads `running`, a stop
        // must find a flag to flip.
        let execution_id = execution.id;
        let hub = self.executor.hub();
        hub.register(execution_id).await;
        let claimed = self
            .store
            .claim_execution(execution_id, ExecutionStatus::Queued.as_str(), ExecutionStatus::Running.as_str())
            .await;
        if !matches!(claimed, Ok(true)) {
            hub.unregister(execution_id).await;
            info!("execution claimed or stopped elsewhere, skipping");
            return claimed.map(|_| ()).map_err(Into::into);
        }
        execution.status = ExecutionStatus::Running.as_str().into();

        let (finished, workflow) = match self.pinned(&execution).await {
            Ok(workflow) => {
                let finished = self
                    .executor
                    .run(execution, &workflow, job.kind == JobKind::Resume)
                    .await;
                (finished, Some(workflow))
            }
            Err(err) => (self.executor.reject(execution, err).await, None),
        };
        hub.unregister(execution_id).await;
        self.record_outcome(&finished?, workflow.as_ref()).await
    }

    async fn pinned(&self, execution: &ExecutionRow) -> Result<PinnedWorkflow, EngineError> {
        let version = self
            .store
            .get_workflow_version(execution.workflow_id, execution.workflow_version)
            .await
            .map_err(EngineError::lookup("workflow version"))?;
        PinnedWorkflow::from_version(&version)
    }

    /// Workflow aggregates, schedule counters and the failure notification.
    async fn record_outcome(
        &self,
        finished: &ExecutionRow,
        workflow: Option<&PinnedWorkflow>,
    ) -> Result<(), EngineError> {
        let status = ExecutionStatus::from_str(&finished.status).map_err(EngineError::InvalidState)?;
        if finished.trigger_source == TriggerType::Schedule.as_str() {
            self.schedules.record(finished.workflow_id, status).await?;
        }

        match status {
            ExecutionStatus::Completed => {
                self.store.record_workflow_outcome(finished.workflow_id, true).await?;
            }
            ExecutionStatus::Failed => {
                self.store.record_workflow_outcome(finished.workflow_id, false).await?;
                let Some(workflow) = workflow else {
                    return Ok(());
                };
                let handling = &workflow.definition.error_handling;
                if handling.notify_on_failure {
                    self.notifier
                        .notify_failure(handling.notification_channel.as_deref(), &workflow.name, finished)
                        .await;
                }
            }
            other => debug!(status = %other, "execution ended without an outcome to record"),
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExecutionWorker {
    async fn handle(&self, job: Job) -> Result<(), QueueError> {
        let execution_id = job.execution_id;
        self.process(job).await.map_err(|err| QueueError::JobFailed {
            execution_id,
            message: err.to_string(),
        })
    }
}
