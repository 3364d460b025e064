//! Units of work passed from dispatchers to workers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker should do with the referenced execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run a freshly created execution from its entry nodes.
    Start,
    /// Resume an execution that was retried, keeping prior successful steps.
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub execution_id: Uuid,
    pub kind: JobKind,
}

impl Job {
    pub fn start(execution_id: Uuid) -> Self {
        Self { execution_id, kind: JobKind::Start }
    }

    pub fn resume(execution_id: Uuid) -> Self {
        Self { execution_id, kind: JobKind::Resume }
    }
}
