//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Graph definitions are stored as JSON; their domain types live in the
//! `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Declares a text-backed status enum with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

text_enum! {
    /// Lifecycle of a workflow definition.
    WorkflowStatus {
        Draft => "draft",
        Active => "active",
        Inactive => "inactive",
        Archived => "archived",
    }
}

text_enum! {
    /// How a workflow is started; also the `trigger_source` of an execution.
    TriggerType {
        Manual => "manual",
        Schedule => "schedule",
        Webhook => "webhook",
        Event => "event",
    }
}

text_enum! {
    /// Possible statuses for a workflow execution.
    ExecutionStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Stopped => "stopped",
    }
}

text_enum! {
    /// Possible statuses for a single execution step.
    StepStatus {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

text_enum! {
    /// How the webhook gateway answers an accepted call.
    ResponseMode {
        Immediate => "immediate",
        WaitForCompletion => "wait_for_completion",
    }
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    /// Short human-facing id, e.g. `WF-1A2B3C4D`.
    pub human_id: String,
    pub project_id: Uuid,
    pub organisation_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub trigger_type: String,
    pub trigger_config: Value,
    /// Graph and policies: nodes, edges, viewport, global_variables,
    /// timeout_seconds, retry_policy, error_handling.
    pub definition: Value,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub version: i32,
    pub environment: String,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of a workflow at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowVersionRow {
    pub workflow_id: Uuid,
    pub version: i32,
    pub name: String,
    pub trigger_type: String,
    pub trigger_config: Value,
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by [`crate::Store::list_workflows`].
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub project_id: Option<Uuid>,
    pub status: Option<String>,
    pub category: Option<String>,
    /// Case-insensitive match against name, description and human id.
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// A persisted workflow execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub human_id: String,
    pub workflow_id: Uuid,
    /// Version the run is pinned to.
    pub workflow_version: i32,
    pub status: String,
    pub trigger_source: String,
    pub trigger_data: Value,
    pub input_data: Value,
    pub output_data: Option<Value>,
    /// Node ids in the order they were started.
    pub execution_path: Vec<String>,
    pub current_node_id: Option<String>,
    pub total_nodes: i32,
    pub completed_nodes: i32,
    pub failed_nodes: i32,
    pub skipped_nodes: i32,
    pub error_message: Option<String>,
    pub error_node_id: Option<String>,
    pub error_stack: Option<String>,
    pub retry_count: i32,
    pub duration_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub triggered_by: Option<String>,
    pub execution_context: Value,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// execution_steps
// ---------------------------------------------------------------------------

/// One row per node visited in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionStepRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub node_name: String,
    /// Strictly increasing in the order steps were started.
    pub step_order: i32,
    pub status: String,
    /// Number of invocations, retries included.
    pub attempts: i32,
    pub input: Value,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub error_type: Option<String>,
    pub duration_ms: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// workflow_schedules
// ---------------------------------------------------------------------------

/// At most one per workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScheduleRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cron_expression: String,
    /// IANA name, e.g. `Europe/Berlin`.
    pub timezone: String,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub failed_runs: i64,
    pub consecutive_failures: i32,
    pub auto_disabled: bool,
    pub trigger_data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_webhooks
// ---------------------------------------------------------------------------

/// At most one per workflow; `path` is globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WebhookRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub path: String,
    pub method: String,
    pub enabled: bool,
    pub require_auth: bool,
    pub secret_key: Option<String>,
    pub allowed_ips: Vec<String>,
    pub response_mode: String,
    pub response_data: Option<Value>,
    pub total_calls: i64,
    pub accepted_calls: i64,
    pub rejected_calls: i64,
    pub last_called_at: Option<DateTime<Utc>>,
    pub rate_limit_max_calls: Option<i32>,
    pub rate_limit_window_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_round_trip_through_strings() {
        assert_eq!("wait_for_completion".parse::<ResponseMode>(), Ok(ResponseMode::WaitForCompletion));
        assert_eq!(ExecutionStatus::Stopped.to_string(), "stopped");
        assert!("paused".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }
}
