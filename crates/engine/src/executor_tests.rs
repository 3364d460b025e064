//! Scenario tests for the graph executor.
//!
//! Everything runs against `MemoryStore` with `MockNode`s registered under
//! their own type keys, so each test controls exactly what every node does.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{ExecutionRow, ExecutionStepRow};
use db::{MemoryStore, Store};
use nodes::mock::MockNode;
use nodes::{ExecutableNode, InMemoryCredentialStore, NodeError, NodeRegistry};

use crate::hub::{ExecutionHub, LiveMessageType};
use crate::models::{
    EdgeData, NodeData, OnError, PinnedWorkflow, RetryPolicy, WorkflowDefinition, WorkflowEdge, WorkflowNode,
};
use crate::{EngineConfig, WorkflowExecutor};

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

fn node(id: &str, node_type: &str) -> WorkflowNode {
    WorkflowNode {
        id: id.into(),
        kind: "action".into(),
        position: Default::default(),
        data: NodeData {
            label: id.to_uppercase(),
            node_type: node_type.into(),
            ..Default::default()
        },
        size: None,
        selected: None,
    }
}

fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge {
        id: format!("{source}->{target}"),
        source: source.into(),
        target: target.into(),
        source_handle: None,
        target_handle: None,
        label: None,
        edge_type: None,
        animated: false,
        data: EdgeData::default(),
    }
}

fn handle_edge(source: &str, target: &str, handle: &str) -> WorkflowEdge {
    WorkflowEdge {
        source_handle: Some(handle.into()),
        ..edge(source, target)
    }
}

/// Nodes `ids` chained in order; each node's type is its own id.
fn chain(ids: &[&str]) -> WorkflowDefinition {
    WorkflowDefinition {
        nodes: ids.iter().map(|id| node(id, id)).collect(),
        edges: ids.windows(2).map(|w| edge(w[0], w[1])).collect(),
        ..Default::default()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    registry: NodeRegistry,
    hub: ExecutionHub,
    config: EngineConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            registry: NodeRegistry::with_builtins(),
            hub: ExecutionHub::new(),
            config: EngineConfig::default(),
        }
    }

    fn mock(&mut self, key: &str, mock: MockNode) -> Arc<MockNode> {
        let mock = Arc::new(mock);
        self.registry.register_as(key, mock.clone());
        mock
    }

    fn executor(&self) -> WorkflowExecutor {
        WorkflowExecutor::new(
            self.store.clone(),
            Arc::new(self.registry.clone()),
            Arc::new(InMemoryCredentialStore::new()),
            self.hub.clone(),
            self.config.clone(),
        )
    }

    async fn queued(&self, workflow: &PinnedWorkflow, input: Value) -> ExecutionRow {
        let row = ExecutionRow {
            id: Uuid::new_v4(),
            human_id: "EX-TEST0001".into(),
            workflow_id: workflow.id,
            workflow_version: workflow.version,
            status: "queued".into(),
            trigger_source: "manual".into(),
            trigger_data: json!({ "input": input }),
            input_data: input,
            output_data: None,
            execution_path: vec![],
            current_node_id: None,
            total_nodes: workflow.definition.nodes.len() as i32,
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
        };
        self.store.insert_execution(&row).await.unwrap();
        row
    }

    async fn run(&self, def: WorkflowDefinition) -> (ExecutionRow, Vec<ExecutionStepRow>) {
        let workflow = PinnedWorkflow::new("test", def);
        let execution = self.queued(&workflow, json!({ "seed": 1 })).await;
        let finished = self.executor().run(execution, &workflow, false).await.unwrap();
        let steps = self.store.list_steps(finished.id).await.unwrap();
        (finished, steps)
    }
}

fn step<'a>(steps: &'a [ExecutionStepRow], node_id: &str) -> &'a ExecutionStepRow {
    steps
        .iter()
        .rev()
        .find(|s| s.node_id == node_id)
        .unwrap_or_else(|| panic!("no step for {node_id}"))
}

fn assert_counts_within_total(row: &ExecutionRow) {
    assert!(row.completed_nodes + row.failed_nodes + row.skipped_nodes <= row.total_nodes);
}

fn retry_twice() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        retry_delay_seconds: 1.0,
        backoff_multiplier: 2.0,
        retry_on_error_types: vec![],
    }
}

// ---------------------------------------------------------------------------
// happy path and retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn flaky_middle_node_is_retried_and_the_run_completes() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({ "x": 1 })));
    let b = h.mock("b", MockNode::flaky("b", 2, json!({ "y": 2 })));
    let c = h.mock("c", MockNode::returning("c", json!({ "z": 3 })));

    let mut def = chain(&["a", "b", "c"]);
    def.nodes[1].data.retry_policy = Some(retry_twice());

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(step(&steps, "b").attempts, 3);
    assert_eq!(step(&steps, "b").status, "completed");
    assert_eq!(b.call_count(), 3);
    assert_eq!(c.call_count(), 1);
    assert_eq!(c.inputs()[0]["node"], "b");
    assert_eq!(row.execution_path, vec!["a", "b", "c"]);
    assert_eq!(row.completed_nodes, 3);
    assert_eq!(row.output_data.as_ref().unwrap()["z"], 3);
    assert_eq!(row.execution_context["nodes"]["a"]["x"], 1);
}

#[tokio::test(start_paused = true)]
async fn step_orders_increase_in_start_order() {
    let mut h = Harness::new();
    for id in ["a", "b", "c"] {
        h.mock(id, MockNode::returning(id, json!({})));
    }
    let (_, steps) = h.run(chain(&["a", "b", "c"])).await;

    let orders: Vec<i32> = steps.iter().map(|s| s.step_order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert!(steps.iter().all(|s| s.completed_at.is_some() && s.duration_ms.is_some()));
}

#[tokio::test(start_paused = true)]
async fn root_receives_trigger_input_and_config_is_templated() {
    let mut h = Harness::new();
    let a = h.mock("a", MockNode::returning("a", json!({})));
    let mut def = chain(&["a", "greet"]);
    def.nodes[1].data.node_type = "set".into();
    def.nodes[1].data.config = json!({ "values": { "greeting": "hello {{input.node}}", "seed": "{{trigger.input.seed}}" } });

    let (row, _) = h.run(def).await;

    assert_eq!(a.inputs()[0], json!({ "seed": 1 }));
    assert_eq!(row.status, "completed");
    let out = row.output_data.unwrap();
    assert_eq!(out["greeting"], "hello a");
    assert_eq!(out["seed"], 1);
}

// ---------------------------------------------------------------------------
// on_error policies
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stop_policy_halts_everything_after_the_failure() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({})));
    h.mock("b", MockNode::failing_fatal("b", "kaput"));
    let c = h.mock("c", MockNode::returning("c", json!({})));

    let (row, steps) = h.run(chain(&["a", "b", "c"])).await;

    assert_eq!(row.status, "failed");
    assert_eq!(row.error_node_id.as_deref(), Some("b"));
    assert!(row.error_message.as_deref().unwrap().contains("kaput"));
    assert!(row.error_stack.is_some());
    assert_eq!(c.call_count(), 0);
    assert!(steps.iter().all(|s| s.node_id != "c"));
    assert_eq!(step(&steps, "b").error_type.as_deref(), Some("fatal"));
    assert_eq!((row.completed_nodes, row.failed_nodes), (1, 1));
    assert_counts_within_total(&row);
}

#[tokio::test(start_paused = true)]
async fn continue_policy_lets_independent_branches_complete() {
    let mut h = Harness::new();
    h.mock("b", MockNode::failing_fatal("b", "kaput"));
    let c = h.mock("c", MockNode::returning("c", json!({})));
    let d = h.mock("d", MockNode::returning("d", json!({ "ok": true })));

    // t -> b -> c, t -> d
    let mut def = WorkflowDefinition {
        nodes: vec![node("t", "trigger"), node("b", "b"), node("c", "c"), node("d", "d")],
        edges: vec![edge("t", "b"), edge("b", "c"), edge("t", "d")],
        ..Default::default()
    };
    def.error_handling.on_error = OnError::Continue;

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(d.call_count(), 1);
    assert_eq!(c.call_count(), 0);
    assert_eq!(step(&steps, "c").status, "skipped");
    assert_eq!(step(&steps, "d").status, "completed");
    assert_eq!((row.completed_nodes, row.failed_nodes, row.skipped_nodes), (2, 1, 1));
    assert_eq!(row.error_node_id.as_deref(), Some("b"));
    assert_eq!(row.output_data.unwrap()["ok"], true);
}

#[tokio::test(start_paused = true)]
async fn error_edges_carry_the_failure_under_continue() {
    let mut h = Harness::new();
    h.mock("a", MockNode::failing_fatal("a", "bad input"));
    let on_fail = h.mock("on_fail", MockNode::returning("on_fail", json!({})));
    let next = h.mock("next", MockNode::returning("next", json!({})));

    let mut def = WorkflowDefinition {
        nodes: vec![node("a", "a"), node("on_fail", "on_fail"), node("next", "next")],
        edges: vec![handle_edge("a", "on_fail", "error"), edge("a", "next")],
        ..Default::default()
    };
    def.error_handling.on_error = OnError::Continue;

    let (row, _) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(next.call_count(), 0);
    let input = &on_fail.inputs()[0];
    assert_eq!(input["error"]["node_id"], "a");
    assert_eq!(input["error"]["type"], "fatal");
    assert_eq!(input["input"], json!({ "seed": 1 }));
}

#[tokio::test(start_paused = true)]
async fn goto_error_handler_routes_the_error_to_the_handler() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({})));
    h.mock("b", MockNode::failing_with("b", NodeError::integration("rate_limited", "slow down")));
    let c = h.mock("c", MockNode::returning("c", json!({})));

    let mut def = chain(&["a", "b", "c"]);
    def.nodes.push(node("handler", "error_handler"));
    def.error_handling.on_error = OnError::GotoErrorHandler;
    def.error_handling.error_handler_node_id = Some("handler".into());

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(c.call_count(), 0);
    let handler = step(&steps, "handler");
    assert_eq!(handler.status, "completed");
    assert_eq!(handler.input["error"]["node_id"], "b");
    assert_eq!(handler.input["error"]["type"], "rate_limited");
    assert_eq!(handler.output.as_ref().unwrap()["handled"], true);
    // The original failure stays on the execution.
    assert_eq!(row.error_node_id.as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn handler_chain_nodes_that_already_ran_are_not_rerun() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({})));
    let handler = h.mock("h", MockNode::returning("h", json!({ "handled": true })));
    let d = h.mock("d", MockNode::returning("d", json!({ "d": 1 })));
    h.mock("b", MockNode::failing_fatal("b", "late failure").with_delay(Duration::from_secs(1)));

    // a -> h -> d finishes in normal flow before b fails.
    let mut def = chain(&["a", "h", "d"]);
    def.nodes.push(node("b", "b"));
    def.edges.push(edge("a", "b"));
    def.error_handling.on_error = OnError::GotoErrorHandler;
    def.error_handling.error_handler_node_id = Some("h".into());

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(d.call_count(), 1);
    assert_eq!(steps.iter().filter(|s| s.node_id == "d").count(), 1);
    assert_eq!(handler.call_count(), 2);
    assert_eq!(step(&steps, "h").input["error"]["node_id"], "b");
    assert_counts_within_total(&row);
}

#[tokio::test(start_paused = true)]
async fn failing_error_handler_fails_the_run() {
    let mut h = Harness::new();
    h.mock("a", MockNode::failing_fatal("a", "first"));
    h.mock("handler", MockNode::failing_fatal("handler", "second"));

    let mut def = chain(&["a"]);
    def.nodes.push(node("handler", "handler"));
    def.error_handling.on_error = OnError::GotoErrorHandler;
    def.error_handling.error_handler_node_id = Some("handler".into());

    let (row, _) = h.run(def).await;

    assert_eq!(row.status, "failed");
    assert_eq!(row.failed_nodes, 2);
    assert_eq!(row.error_node_id.as_deref(), Some("a"));
}

#[tokio::test(start_paused = true)]
async fn goto_without_a_handler_behaves_like_stop() {
    let mut h = Harness::new();
    h.mock("a", MockNode::failing_fatal("a", "boom"));
    let b = h.mock("b", MockNode::returning("b", json!({})));

    let mut def = chain(&["a", "b"]);
    def.error_handling.on_error = OnError::GotoErrorHandler;

    let (row, _) = h.run(def).await;

    assert_eq!(row.status, "failed");
    assert_eq!(b.call_count(), 0);
}

// ---------------------------------------------------------------------------
// gating
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disabled_node_is_skipped_but_passes_input_through() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({ "v": 7 })));
    let b = h.mock("b", MockNode::returning("b", json!({})));
    let c = h.mock("c", MockNode::returning("c", json!({})));

    let mut def = chain(&["a", "b", "c"]);
    def.nodes[1].data.disabled = true;

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(b.call_count(), 0);
    assert_eq!(step(&steps, "b").status, "skipped");
    assert_eq!(c.inputs()[0]["v"], 7);
    assert_eq!((row.completed_nodes, row.skipped_nodes), (2, 1));
}

#[tokio::test(start_paused = true)]
async fn condition_handles_pick_one_branch() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({ "amount": 250 })));
    let big = h.mock("big", MockNode::returning("big", json!({})));
    let small = h.mock("small", MockNode::returning("small", json!({})));
    let after_small = h.mock("after_small", MockNode::returning("after_small", json!({})));

    let mut check = node("check", "condition");
    check.data.config = json!({ "conditions": [{ "field": "amount", "operator": "gte", "value": 100 }] });
    let def = WorkflowDefinition {
        nodes: vec![
            node("a", "a"),
            check,
            node("big", "big"),
            node("small", "small"),
            node("after_small", "after_small"),
        ],
        edges: vec![
            edge("a", "check"),
            handle_edge("check", "big", "true"),
            handle_edge("check", "small", "false"),
            edge("small", "after_small"),
        ],
        ..Default::default()
    };

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(big.call_count(), 1);
    assert_eq!(big.inputs()[0]["data"]["amount"], 250);
    assert_eq!(small.call_count(), 0);
    assert_eq!(after_small.call_count(), 0);
    assert_eq!(step(&steps, "small").status, "skipped");
    // Skips propagate downstream.
    assert_eq!(step(&steps, "after_small").status, "skipped");
    assert_eq!(row.skipped_nodes, 2);
}

#[tokio::test(start_paused = true)]
async fn conditional_edge_data_gates_the_target() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({ "status": "cold" })));
    let hot = h.mock("hot", MockNode::returning("hot", json!({})));

    let mut def = chain(&["a", "hot"]);
    def.edges[0].data.condition = serde_json::from_value(json!({
        "conditions": [{ "field": "status", "operator": "eq", "value": "hot" }]
    }))
    .unwrap();

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(hot.call_count(), 0);
    assert_eq!(step(&steps, "hot").status, "skipped");
}

#[tokio::test(start_paused = true)]
async fn join_waits_for_all_branches_and_merges_outputs() {
    let mut h = Harness::new();
    h.mock("b", MockNode::returning("b", json!({ "from_b": 1 })).with_delay(Duration::from_secs(2)));
    h.mock("c", MockNode::returning("c", json!({ "from_c": 2 })));
    let d = h.mock("d", MockNode::returning("d", json!({})));

    let def = WorkflowDefinition {
        nodes: vec![node("t", "trigger"), node("b", "b"), node("c", "c"), node("d", "d")],
        edges: vec![edge("t", "b"), edge("t", "c"), edge("b", "d"), edge("c", "d")],
        ..Default::default()
    };

    let (row, _) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert_eq!(d.call_count(), 1);
    let input = &d.inputs()[0];
    assert_eq!(input["from_b"], 1);
    assert_eq!(input["from_c"], 2);
    // c finished first but b was started first.
    assert_eq!(row.execution_path[..3], ["t", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn independent_branches_run_in_parallel() {
    let mut h = Harness::new();
    for id in ["b", "c", "d"] {
        h.mock(id, MockNode::returning(id, json!({})).with_delay(Duration::from_secs(10)));
    }
    let def = WorkflowDefinition {
        nodes: vec![node("t", "trigger"), node("b", "b"), node("c", "c"), node("d", "d")],
        edges: vec![edge("t", "b"), edge("t", "c"), edge("t", "d")],
        ..Default::default()
    };

    let started = tokio::time::Instant::now();
    let (row, _) = h.run(def).await;

    assert_eq!(row.status, "completed");
    assert!(started.elapsed() < Duration::from_secs(20));
    // Several sinks: output keyed by node id.
    let output = row.output_data.unwrap();
    assert!(output.get("b").is_some() && output.get("c").is_some() && output.get("d").is_some());
}

// ---------------------------------------------------------------------------
// timeouts, cancellation, resume
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn workflow_timeout_fails_the_run_and_aborts_in_flight_nodes() {
    let mut h = Harness::new();
    h.mock("slow", MockNode::returning("slow", json!({})).with_delay(Duration::from_secs(60)));
    let after = h.mock("after", MockNode::returning("after", json!({})));

    let mut def = chain(&["slow", "after"]);
    def.timeout_seconds = Some(5.0);

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "failed");
    assert!(row.error_message.as_deref().unwrap().contains("timed out"));
    assert_eq!(step(&steps, "slow").status, "failed");
    assert_eq!(step(&steps, "slow").error_type.as_deref(), Some("timeout"));
    assert_eq!(after.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn node_timeout_is_a_node_failure() {
    let mut h = Harness::new();
    h.mock("slow", MockNode::returning("slow", json!({})).with_delay(Duration::from_secs(60)));
    let mut def = chain(&["slow"]);
    def.nodes[0].data.timeout_seconds = Some(1.0);

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "failed");
    assert_eq!(step(&steps, "slow").error_type.as_deref(), Some("timeout"));
}

#[tokio::test(start_paused = true)]
async fn stop_lets_the_in_flight_node_finish_and_halts() {
    let mut h = Harness::new();
    let a = h.mock("a", MockNode::returning("a", json!({})).with_delay(Duration::from_secs(5)));
    let b = h.mock("b", MockNode::returning("b", json!({})));

    let workflow = PinnedWorkflow::new("stoppable", chain(&["a", "b"]));
    let execution = h.queued(&workflow, json!({})).await;
    let execution_id = execution.id;
    let executor = h.executor();
    let run = tokio::spawn(async move { executor.run(execution, &workflow, false).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.hub.request_stop(execution_id).await);

    let row = run.await.unwrap().unwrap();
    let steps = h.store.list_steps(execution_id).await.unwrap();

    assert_eq!(row.status, "stopped");
    assert_eq!(a.call_count(), 1);
    assert_eq!(step(&steps, "a").status, "completed");
    assert_eq!(b.call_count(), 0);
    // The flag is dropped with the run.
    assert!(!h.hub.request_stop(execution_id).await);
}

#[tokio::test(start_paused = true)]
async fn resume_continues_from_the_failed_node() {
    let mut h = Harness::new();
    let a = h.mock("a", MockNode::returning("a", json!({ "n": 1 })));
    h.mock("b", MockNode::failing_retryable("b", "downstream unavailable"));
    let c = h.mock("c", MockNode::returning("c", json!({})));

    let workflow = PinnedWorkflow::new("resumable", chain(&["a", "b", "c"]));
    let execution = h.queued(&workflow, json!({})).await;
    let failed = h.executor().run(execution, &workflow, false).await.unwrap();
    assert_eq!(failed.status, "failed");
    assert_eq!(failed.failed_nodes, 1);

    // b recovers; retry the same execution row.
    let b = h.mock("b", MockNode::returning("b", json!({})));
    let mut retried = failed.clone();
    retried.status = "queued".into();
    retried.retry_count += 1;
    h.store.update_execution(&retried).await.unwrap();

    let row = h.executor().run(retried, &workflow, true).await.unwrap();
    let steps = h.store.list_steps(row.id).await.unwrap();

    assert_eq!(row.status, "completed");
    assert_eq!(a.call_count(), 1, "a must not run again");
    assert_eq!(b.call_count(), 1);
    assert_eq!(c.call_count(), 1);
    assert_eq!(b.inputs()[0]["n"], 1);
    assert_eq!((row.completed_nodes, row.failed_nodes), (3, 0));
    assert_eq!(row.retry_count, 1);
    assert_eq!(row.error_message, None);
    // The failed attempt stays in the timeline.
    assert_eq!(steps.len(), 4);
    assert_eq!(steps.iter().filter(|s| s.node_id == "b").count(), 2);
    assert!(steps.windows(2).all(|w| w[0].step_order < w[1].step_order));
}

// ---------------------------------------------------------------------------
// validation and live messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_node_type_fails_without_running_anything() {
    let mut h = Harness::new();
    let a = h.mock("a", MockNode::returning("a", json!({})));
    let mut def = chain(&["a", "b"]);
    def.nodes[1].data.node_type = "teleport".into();

    let (row, steps) = h.run(def).await;

    assert_eq!(row.status, "failed");
    assert!(row.error_message.as_deref().unwrap().contains("teleport"));
    assert_eq!(row.error_node_id.as_deref(), Some("b"));
    assert_eq!(a.call_count(), 0);
    assert!(steps.is_empty());
}

#[tokio::test]
async fn panicking_node_is_recorded_as_a_failure() {
    struct Panics;

    #[async_trait::async_trait]
    impl ExecutableNode for Panics {
        fn descriptor(&self) -> nodes::NodeDescriptor {
            MockNode::returning("p", json!({})).descriptor()
        }

        async fn execute(&self, _input: Value, _ctx: &nodes::ExecutionContext) -> Result<Value, NodeError> {
            panic!("node bug")
        }
    }

    let mut h = Harness::new();
    h.registry.register_as("p", Arc::new(Panics));
    let (row, steps) = h.run(chain(&["p"])).await;

    assert_eq!(row.status, "failed");
    assert_eq!(step(&steps, "p").status, "failed");
}

#[tokio::test]
async fn live_viewers_see_step_and_final_messages() {
    let mut h = Harness::new();
    h.mock("a", MockNode::returning("a", json!({})));
    h.mock("b", MockNode::returning("b", json!({})));

    let workflow = PinnedWorkflow::new("live", chain(&["a", "b"]));
    let execution = h.queued(&workflow, json!({})).await;
    let mut rx = h.hub.subscribe(execution.id).await;

    let row = h.executor().run(execution, &workflow, false).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(message) = rx.recv().await {
        assert_eq!(message.execution_run_id, row.id);
        kinds.push(message.kind);
    }
    assert_eq!(
        kinds,
        vec![
            LiveMessageType::StepStarted,
            LiveMessageType::StepCompleted,
            LiveMessageType::StepStarted,
            LiveMessageType::StepCompleted,
            LiveMessageType::ExecutionCompleted,
        ]
    );
}
