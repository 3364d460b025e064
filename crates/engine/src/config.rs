//! Engine tuning knobs.

use std::time::Duration;

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executions processed concurrently by the worker pool.
    pub workers: usize,
    /// Nodes of one execution that may run at the same time.
    pub max_parallel_nodes: usize,
    /// Per-attempt bound for nodes without `data.timeout_seconds`.
    pub default_node_timeout: Option<Duration>,
    /// How often the scheduler looks for due schedules.
    pub scheduler_tick: Duration,
    /// Consecutive failures after which a schedule disables itself.
    pub schedule_failure_threshold: u32,
    /// Longest a `wait_for_completion` webhook call is held open.
    pub webhook_wait_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_parallel_nodes: 8,
            default_node_timeout: Some(Duration::from_secs(300)),
            scheduler_tick: Duration::from_secs(5),
            schedule_failure_threshold: 5,
            webhook_wait_timeout: Duration::from_secs(30),
        }
    }
}
