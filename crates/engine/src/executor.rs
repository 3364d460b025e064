//! Graph Executor.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the DAG of the pinned workflow version.
//! 2. Starts every node whose incoming edges are resolved and at least one
//!    of them active; independent branches run in parallel on a `JoinSet`.
//! 3. Hands each node the merged output of its active predecessors.
//! 4. Records every step through the [`RunTracker`].
//! 5. Applies the retry policy per node and the workflow's `on_error`
//!    policy to terminal node failures.
//!
//! Stop requests are cooperative: the flag is checked between node
//! boundaries and in-flight nodes are allowed to finish. The workflow
//! timeout is enforced around the whole traversal and aborts in-flight
//! nodes.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStatus, StepStatus};
use db::Store;
use nodes::template;
use nodes::{
    CredentialStore, ExecutionContext, NodeError, NodeEventEnvelope, NodeEventSink, NodeRegistry,
};

use crate::dag::{validate_node_types, GraphIndex};
use crate::hub::ExecutionHub;
use crate::models::{OnError, PinnedWorkflow, WorkflowEdge};
use crate::retry::{run_with_retry, AttemptOutcome};
use crate::tracker::{ExecutionState, RunError, RunTracker, TrackerEvent};
use crate::{EngineConfig, EngineError};

/// Runs executions of pinned workflow versions.
pub struct WorkflowExecutor {
    store: Arc<dyn Store>,
    registry: Arc<NodeRegistry>,
    credentials: Arc<dyn CredentialStore>,
    hub: ExecutionHub,
    config: EngineConfig,
}

#[derive(Debug, Clone)]
enum NodeState {
    Pending,
    Running(Uuid),
    Completed(Value),
    /// Carries the error payload routed along `"error"` edges.
    Failed(Value),
    /// `Some` for disabled nodes, which pass their input through.
    Skipped(Option<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    /// `on_error = stop`: nothing new starts.
    Failed,
    /// `goto_error_handler`: only the handler chain may start.
    Diverted,
    /// Stop requested.
    Stopped,
}

enum Readiness {
    Waiting,
    Skip,
    Ready {
        input: Value,
        predecessors: HashMap<String, Value>,
    },
}

struct NodeRun {
    node_id: String,
    step_id: Uuid,
    input: Value,
    outcome: AttemptOutcome,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<NodeRegistry>,
        credentials: Arc<dyn CredentialStore>,
        hub: ExecutionHub,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            credentials,
            hub,
            config,
        }
    }

    pub fn hub(&self) -> &ExecutionHub {
        &self.hub
    }

    /// Run `execution` against `workflow` and return the final row.
    ///
    /// With `resume`, completed and skipped steps that are not downstream of
    /// a failed node are kept and the run continues from there.
    ///
    /// # Errors
    /// Persistence problems, or `InvalidState` when the stored row already
    /// finished. Node failures end up on the returned row.
    #[instrument(skip_all, fields(workflow_id = %workflow.id, execution_id = %execution.id))]
    pub async fn run(
        &self,
        execution: ExecutionRow,
        workflow: &PinnedWorkflow,
        resume: bool,
    ) -> Result<ExecutionRow, EngineError> {
        let def = &workflow.definition;
        let graph = match GraphIndex::build(def)
            .and_then(|g| validate_node_types(def, &self.registry).map(|_| g))
        {
            Ok(graph) => graph,
            Err(err) => return self.reject(execution, err).await,
        };

        let prior_steps = if resume {
            self.store.list_steps(execution.id).await?
        } else {
            Vec::new()
        };
        let prior = ExecutionState::new(execution.clone(), prior_steps.clone(), |_| true);

        // Failed or interrupted nodes and everything downstream run again.
        let unfinished = def.nodes.iter().filter_map(|n| {
            prior
                .latest_step(&n.id)
                .filter(|s| s.status == StepStatus::Failed.as_str() || s.status == StepStatus::Running.as_str())
                .map(|_| n.id.as_str())
        });
        let rerun = graph.reachable_from(def, unfinished);

        let mut states: HashMap<String, NodeState> = HashMap::new();
        for node in &def.nodes {
            let seeded = if rerun.contains(&node.id) {
                None
            } else {
                prior.latest_step(&node.id).and_then(|s| match s.status.as_str() {
                    "completed" => Some(NodeState::Completed(s.output.clone().unwrap_or(Value::Null))),
                    "skipped" => Some(NodeState::Skipped(s.output.clone())),
                    _ => None,
                })
            };
            states.insert(node.id.clone(), seeded.unwrap_or(NodeState::Pending));
        }
        if resume {
            info!(
                kept = states.values().filter(|s| !matches!(s, NodeState::Pending)).count(),
                "resuming execution"
            );
        }

        let state = ExecutionState::new(execution, prior_steps, |node_id| {
            !matches!(states.get(node_id), Some(NodeState::Pending) | None)
        });
        let tracker = RunTracker::new(self.store.clone(), self.hub.clone(), state);

        let handler_id = def.error_handling.error_handler_node_id.clone();
        let triggers: HashSet<String> = def
            .nodes
            .iter()
            .filter(|n| n.is_trigger() && Some(&n.id) != handler_id.as_ref())
            .map(|n| n.id.clone())
            .collect();
        let entries = if triggers.is_empty() {
            def.nodes
                .iter()
                .filter(|n| graph.incoming(&n.id).is_empty() && Some(&n.id) != handler_id.as_ref())
                .map(|n| n.id.clone())
                .collect()
        } else {
            triggers
        };
        let handler_chain = match &handler_id {
            Some(h) => graph.reachable_from(def, [h.as_str()]),
            None => HashSet::new(),
        };

        let execution_id = tracker.state().execution.id;
        let cancel = self.hub.register(execution_id).await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut run = Run {
            exec: self,
            workflow,
            graph,
            states,
            entries,
            handler_chain,
            handler_input: None,
            handler_failed: false,
            tracker,
            tasks: JoinSet::new(),
            events_tx,
            events_rx,
            cancel,
            halted: None,
            first_error: None,
        };

        let result = run.execute().await;
        self.hub.unregister(execution_id).await;
        self.hub.close(execution_id).await;
        result
    }

    /// Fail an execution whose workflow cannot run at all.
    pub(crate) async fn reject(&self, execution: ExecutionRow, err: EngineError) -> Result<ExecutionRow, EngineError> {
        error!(error = %err, "workflow is not executable");
        let state = ExecutionState::new(execution, Vec::new(), |_| true);
        let mut tracker = RunTracker::new(self.store.clone(), self.hub.clone(), state);
        let node_id = match &err {
            EngineError::UnknownNodeType { node_id, .. } => Some(node_id.clone()),
            _ => None,
        };
        let now = Utc::now();
        tracker
            .record(TrackerEvent::RunStarted { at: now, context: json!({}) })
            .await?;
        tracker
            .record(TrackerEvent::RunFinished {
                status: ExecutionStatus::Failed,
                output: None,
                error: Some(RunError {
                    message: err.to_string(),
                    node_id,
                    stack: None,
                }),
                at: now,
            })
            .await?;
        let execution_id = tracker.state().execution.id;
        self.hub.close(execution_id).await;
        Ok(tracker.into_execution())
    }
}

// ---------------------------------------------------------------------------
// One run
// ---------------------------------------------------------------------------

struct Run<'a> {
    exec: &'a WorkflowExecutor,
    workflow: &'a PinnedWorkflow,
    graph: GraphIndex,
    states: HashMap<String, NodeState>,
    entries: HashSet<String>,
    handler_chain: HashSet<String>,
    /// Set once the error handler has been engaged.
    handler_input: Option<Value>,
    handler_failed: bool,
    tracker: RunTracker,
    tasks: JoinSet<NodeRun>,
    events_tx: NodeEventSink,
    events_rx: mpsc::UnboundedReceiver<NodeEventEnvelope>,
    cancel: Arc<AtomicBool>,
    halted: Option<Halt>,
    first_error: Option<RunError>,
}

impl Run<'_> {
    async fn execute(&mut self) -> Result<ExecutionRow, EngineError> {
        let workflow = self.workflow;
        let def = &workflow.definition;
        let execution = &self.tracker.state().execution;
        let context = json!({
            "trigger": execution.trigger_data,
            "variables": Value::Object(def.global_variables.clone()),
            "nodes": self.known_outputs(),
        });
        self.tracker
            .record(TrackerEvent::RunStarted { at: Utc::now(), context })
            .await?;
        info!(nodes = def.nodes.len(), "execution started");

        let limit = def
            .timeout_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        let timed_out = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.drive()).await {
                Ok(result) => {
                    result?;
                    false
                }
                Err(_) => true,
            },
            None => {
                self.drive().await?;
                false
            }
        };

        let (status, error) = if timed_out {
            self.abort_in_flight().await?;
            let secs = def.timeout_seconds.unwrap_or_default();
            warn!(timeout_seconds = secs, "execution timed out");
            (
                ExecutionStatus::Failed,
                Some(RunError {
                    message: format!("workflow timed out after {secs}s"),
                    node_id: None,
                    stack: None,
                }),
            )
        } else {
            let status = match self.halted {
                Some(Halt::Failed) => ExecutionStatus::Failed,
                Some(Halt::Stopped) => ExecutionStatus::Stopped,
                Some(Halt::Diverted) if self.handler_failed => ExecutionStatus::Failed,
                Some(Halt::Diverted) | None => ExecutionStatus::Completed,
            };
            (status, None)
        };

        let output = self.sink_output();
        self.tracker
            .record(TrackerEvent::RunFinished {
                status,
                output,
                error,
                at: Utc::now(),
            })
            .await?;

        let row = &self.tracker.state().execution;
        info!(
            status = %row.status,
            completed = row.completed_nodes,
            failed = row.failed_nodes,
            skipped = row.skipped_nodes,
            duration_ms = ?row.duration_ms,
            "execution finished"
        );
        Ok(row.clone())
    }

    async fn drive(&mut self) -> Result<(), EngineError> {
        loop {
            if self.cancel.load(Ordering::SeqCst)
                && !matches!(self.halted, Some(Halt::Stopped | Halt::Failed))
            {
                info!("stop requested, draining in-flight nodes");
                self.halted = Some(Halt::Stopped);
            }

            self.schedule_ready().await?;
            if self.tasks.is_empty() {
                return Ok(());
            }

            tokio::select! {
                Some(joined) = self.tasks.join_next() => {
                    // Console lines a node emitted go out before its result.
                    while let Ok(envelope) = self.events_rx.try_recv() {
                        self.tracker.relay(envelope).await;
                    }
                    match joined {
                        Ok(run) => self.on_node_finished(run).await?,
                        Err(err) => error!(error = %err, "node task aborted"),
                    }
                }
                Some(envelope) = self.events_rx.recv() => self.tracker.relay(envelope).await,
                else => return Ok(()),
            }
        }
    }

    // ------ scheduling ------

    fn may_schedule(&self, node_id: &str) -> bool {
        match self.halted {
            None => true,
            Some(Halt::Diverted) => self.handler_chain.contains(node_id),
            Some(Halt::Failed | Halt::Stopped) => false,
        }
    }

    async fn schedule_ready(&mut self) -> Result<(), EngineError> {
        let workflow = self.workflow;
        let order = self.graph.order.clone();
        for node_id in &order {
            if !matches!(self.states.get(node_id), Some(NodeState::Pending)) || !self.may_schedule(node_id) {
                continue;
            }
            match self.readiness(node_id) {
                Readiness::Waiting => {}
                Readiness::Skip => self.skip(node_id, Value::Null, None).await?,
                Readiness::Ready { input, predecessors } => {
                    let disabled = workflow
                        .definition
                        .node(node_id)
                        .is_some_and(|n| n.data.disabled);
                    if disabled {
                        self.skip(node_id, input.clone(), Some(input)).await?;
                    } else if self.tasks.len() < self.exec.config.max_parallel_nodes.max(1) {
                        self.start(node_id, input, predecessors).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn readiness(&self, node_id: &str) -> Readiness {
        let handler = self.workflow.definition.error_handling.error_handler_node_id.as_deref();
        if let Some(payload) = self.handler_input.as_ref().filter(|_| handler == Some(node_id)) {
            return Readiness::Ready {
                input: payload.clone(),
                predecessors: HashMap::new(),
            };
        }
        if self.entries.contains(node_id) {
            return Readiness::Ready {
                input: self.tracker.state().execution.input_data.clone(),
                predecessors: HashMap::new(),
            };
        }

        let incoming = self.graph.incoming(node_id);
        if incoming.is_empty() {
            return Readiness::Waiting;
        }

        let mut active: Vec<(String, Value)> = Vec::new();
        for &e in incoming {
            let edge = &self.workflow.definition.edges[e];
            match self.states.get(&edge.source) {
                Some(NodeState::Pending | NodeState::Running(_)) | None => return Readiness::Waiting,
                Some(state) => {
                    if let Some(value) = edge_output(edge, state) {
                        active.push((edge.source.clone(), value));
                    }
                }
            }
        }

        if active.is_empty() {
            return Readiness::Skip;
        }
        let input = merge_inputs(&active);
        Readiness::Ready {
            input,
            predecessors: active.into_iter().collect(),
        }
    }

    async fn skip(&mut self, node_id: &str, input: Value, passthrough: Option<Value>) -> Result<(), EngineError> {
        let workflow = self.workflow;
        let Some(node) = workflow.definition.node(node_id) else {
            return Ok(());
        };
        debug!(node_id, disabled = passthrough.is_some(), "skipping node");
        self.tracker
            .record(TrackerEvent::StepSkipped {
                step_id: Uuid::new_v4(),
                node_id: node_id.to_owned(),
                node_type: node.step_type(),
                node_name: node.name().to_owned(),
                input,
                passthrough: passthrough.clone(),
                at: Utc::now(),
            })
            .await?;
        self.states.insert(node_id.to_owned(), NodeState::Skipped(passthrough));
        Ok(())
    }

    async fn start(
        &mut self,
        node_id: &str,
        input: Value,
        predecessors: HashMap<String, Value>,
    ) -> Result<(), EngineError> {
        let workflow = self.workflow;
        let def = &workflow.definition;
        let Some(node) = def.node(node_id) else {
            return Ok(());
        };
        let step_id = Uuid::new_v4();
        self.tracker
            .record(TrackerEvent::StepStarted {
                step_id,
                node_id: node_id.to_owned(),
                node_type: node.step_type(),
                node_name: node.name().to_owned(),
                input: input.clone(),
                at: Utc::now(),
            })
            .await?;
        self.states.insert(node_id.to_owned(), NodeState::Running(step_id));
        debug!(node_id, %step_id, "node started");

        let execution = &self.tracker.state().execution;
        let variables = Value::Object(def.global_variables.clone());
        let scope = json!({
            "input": input,
            "trigger": execution.trigger_data,
            "variables": variables,
            "nodes": self.known_outputs(),
            "execution": {
                "id": execution.id,
                "human_id": execution.human_id,
                "workflow_id": execution.workflow_id,
            },
        });

        let mut ctx = ExecutionContext::new(execution.workflow_id, execution.id, node_id);
        ctx.step_id = step_id;
        ctx.config = template::render(&node.data.config, &scope);
        ctx.trigger = execution.trigger_data.clone();
        ctx.variables = variables;
        ctx.predecessors = predecessors;
        ctx.events = Some(self.events_tx.clone());

        let implementation = self
            .exec
            .registry
            .resolve(node.node_type(), node.integration_type());
        let credentials = self.exec.credentials.clone();
        let credentials_id = node.data.credentials_id.clone();
        let policy = def.retry_policy_for(node);
        let attempt_timeout = node
            .data
            .timeout_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
            .or(self.exec.config.default_node_timeout);
        let node_id = node_id.to_owned();

        let attempt_input = input.clone();

        self.tasks.spawn(async move {
            let attempt = AssertUnwindSafe(async move {
                let Some(implementation) = implementation else {
                    return AttemptOutcome {
                        result: Err(NodeError::Config("no implementation registered".into())),
                        attempts: 1,
                    };
                };
                if let Some(id) = credentials_id {
                    match credentials.resolve(&id).await {
                        Ok(resolved) => ctx.credentials = resolved,
                        Err(err) => return AttemptOutcome { result: Err(err), attempts: 1 },
                    }
                }
                run_with_retry(implementation, attempt_input, ctx, &policy, attempt_timeout).await
            });
            let outcome = attempt.catch_unwind().await.unwrap_or_else(|_| AttemptOutcome {
                result: Err(NodeError::Fatal("node panicked".into())),
                attempts: 1,
            });
            NodeRun {
                node_id,
                step_id,
                input,
                outcome,
            }
        });
        Ok(())
    }

    // ------ completion ------

    async fn on_node_finished(&mut self, run: NodeRun) -> Result<(), EngineError> {
        let NodeRun {
            node_id,
            step_id,
            input,
            outcome,
        } = run;
        let attempts = outcome.attempts;

        let err = match outcome.result {
            Ok(output) => {
                info!(node_id = %node_id, attempts, "node completed");
                self.tracker
                    .record(TrackerEvent::StepCompleted {
                        step_id,
                        output: output.clone(),
                        attempts,
                        at: Utc::now(),
                    })
                    .await?;
                self.states.insert(node_id, NodeState::Completed(output));
                return Ok(());
            }
            Err(err) => err,
        };

        error!(node_id = %node_id, attempts, error = %err, "node failed");
        self.tracker
            .record(TrackerEvent::StepFailed {
                step_id,
                error_message: err.to_string(),
                error_type: err.error_type().to_owned(),
                attempts,
                at: Utc::now(),
            })
            .await?;

        let workflow = self.workflow;
        let def = &workflow.definition;
        let (node_name, node_type) = def
            .node(&node_id)
            .map(|n| (n.name().to_owned(), n.step_type()))
            .unwrap_or_default();
        let payload = json!({
            "error": {
                "message": err.to_string(),
                "type": err.error_type(),
                "node_id": node_id,
                "node_name": node_name,
                "attempts": attempts,
            },
            "input": input,
        });
        self.states.insert(node_id.clone(), NodeState::Failed(payload.clone()));

        if self.first_error.is_none() {
            let error = RunError {
                message: format!("node '{node_id}' failed: {err}"),
                node_id: Some(node_id.clone()),
                stack: Some(format!(
                    "{err:?}\n  at node '{node_id}' ({node_type}) after {attempts} attempt(s)"
                )),
            };
            self.first_error = Some(error.clone());
            self.tracker.record(TrackerEvent::ErrorRecorded { error }).await?;
        }

        if self.handler_input.is_some() && self.handler_chain.contains(&node_id) {
            self.handler_failed = true;
            return Ok(());
        }

        match (def.error_handling.on_error, def.error_handling.error_handler_node_id.clone()) {
            (OnError::Continue, _) => {}
            (OnError::GotoErrorHandler, Some(handler)) => {
                if self.handler_input.is_none() && !matches!(self.halted, Some(Halt::Stopped)) {
                    info!(node_id = %node_id, handler = %handler, "routing failure to error handler");
                    self.engage_handler(payload);
                }
            }
            (OnError::Stop, _) | (OnError::GotoErrorHandler, None) => {
                if self.halted != Some(Halt::Stopped) {
                    self.halted = Some(Halt::Failed);
                }
            }
        }
        Ok(())
    }

    /// Divert to the error handler. The handler runs again with the error
    /// payload; chain nodes that already completed or failed keep their
    /// result and are not rerun.
    fn engage_handler(&mut self, payload: Value) {
        self.halted = Some(Halt::Diverted);
        self.handler_input = Some(payload);
        let workflow = self.workflow;
        let handler = workflow.definition.error_handling.error_handler_node_id.as_deref();
        for id in &self.handler_chain {
            let reset = match self.states.get(id) {
                Some(NodeState::Running(_)) => false,
                Some(NodeState::Completed(_) | NodeState::Failed(_)) => handler == Some(id.as_str()),
                Some(NodeState::Pending | NodeState::Skipped(_)) | None => true,
            };
            if reset {
                self.states.insert(id.clone(), NodeState::Pending);
            }
        }
    }

    /// Abort in-flight nodes after a timeout and fail their steps.
    async fn abort_in_flight(&mut self) -> Result<(), EngineError> {
        self.tasks.abort_all();
        let running: Vec<(String, Uuid)> = self
            .states
            .iter()
            .filter_map(|(id, s)| match s {
                NodeState::Running(step_id) => Some((id.clone(), *step_id)),
                _ => None,
            })
            .collect();
        for (node_id, step_id) in running {
            let attempts = self
                .tracker
                .state()
                .step(step_id)
                .map_or(1, |s| s.attempts.max(1) as u32);
            self.tracker
                .record(TrackerEvent::StepFailed {
                    step_id,
                    error_message: "aborted: workflow timeout exceeded".into(),
                    error_type: "timeout".into(),
                    attempts,
                    at: Utc::now(),
                })
                .await?;
            self.states.insert(node_id, NodeState::Failed(Value::Null));
        }
        Ok(())
    }

    // ------ data ------

    fn known_outputs(&self) -> Value {
        let mut nodes = Map::new();
        for (id, state) in &self.states {
            match state {
                NodeState::Completed(out) | NodeState::Skipped(Some(out)) => {
                    nodes.insert(id.clone(), out.clone());
                }
                _ => {}
            }
        }
        Value::Object(nodes)
    }

    /// Output of the single completed sink, or an object keyed by sink id.
    fn sink_output(&self) -> Option<Value> {
        let mut sinks: Vec<(String, Value)> = self
            .graph
            .order
            .iter()
            .filter(|id| self.graph.outgoing(id).is_empty())
            .filter_map(|id| match self.states.get(id) {
                Some(NodeState::Completed(out)) => Some((id.clone(), out.clone())),
                _ => None,
            })
            .collect();
        match sinks.len() {
            0 => None,
            1 => sinks.pop().map(|(_, out)| out),
            _ => Some(Value::Object(sinks.into_iter().collect())),
        }
    }
}

/// The data an edge carries when it is active, `None` when it is gated off.
fn edge_output(edge: &WorkflowEdge, source: &NodeState) -> Option<Value> {
    let handle = edge.source_handle.as_deref();
    match source {
        NodeState::Completed(out) => {
            match handle {
                Some("error") => return None,
                Some(h @ ("true" | "false")) => {
                    let result = out.get("result").and_then(Value::as_bool).unwrap_or(false);
                    if result != (h == "true") {
                        return None;
                    }
                }
                _ => {}
            }
            match &edge.data.condition {
                Some(condition) if !condition.evaluate(out) => None,
                _ => Some(out.clone()),
            }
        }
        NodeState::Skipped(Some(out)) => (handle != Some("error")).then(|| out.clone()),
        NodeState::Failed(payload) => (handle == Some("error")).then(|| payload.clone()),
        NodeState::Skipped(None) | NodeState::Pending | NodeState::Running(_) => None,
    }
}

/// One input passes through; several are shallow-merged, with non-object
/// outputs kept under their source id.
fn merge_inputs(active: &[(String, Value)]) -> Value {
    if let [(_, only)] = active {
        return only.clone();
    }
    let mut merged = Map::new();
    for (source, value) in active {
        match value {
            Value::Object(obj) => merged.extend(obj.iter().map(|(k, v)| (k.clone(), v.clone()))),
            other => {
                merged.insert(source.clone(), other.clone());
            }
        }
    }
    Value::Object(merged)
}
