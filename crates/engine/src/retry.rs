//! Retry/Error Policy Engine: node-level retry arithmetic and the attempt loop.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use nodes::{ExecutableNode, ExecutionContext, NodeError};

use crate::models::RetryPolicy;

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based):
    /// `retry_delay_seconds * backoff_multiplier^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.retry_delay_seconds.max(0.0);
        let factor = self.backoff_multiplier.max(0.0).powi(retry.saturating_sub(1) as i32);
        Duration::try_from_secs_f64(base * factor).unwrap_or(Duration::MAX)
    }

    /// Whether `error` after `attempts` invocations earns another attempt.
    pub fn should_retry(&self, error: &NodeError, attempts: u32) -> bool {
        error.is_retryable()
            && attempts <= self.max_retries
            && (self.retry_on_error_types.is_empty()
                || self.retry_on_error_types.iter().any(|t| t == error.error_type()))
    }
}

/// Result of running one node to completion or terminal failure.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub result: Result<Value, NodeError>,
    /// Invocations made, retries included.
    pub attempts: u32,
}

/// Invoke `node`, retrying per `policy`. Each attempt is bounded by
/// `attempt_timeout` when set.
pub async fn run_with_retry(
    node: Arc<dyn ExecutableNode>,
    input: Value,
    mut ctx: ExecutionContext,
    policy: &RetryPolicy,
    attempt_timeout: Option<Duration>,
) -> AttemptOutcome {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        ctx.attempt = attempts;

        let call = node.execute(input.clone(), &ctx);
        let result = match attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(NodeError::Timeout(format!(
                    "attempt exceeded {:.3}s",
                    limit.as_secs_f64()
                ))),
            },
            None => call.await,
        };

        let err = match result {
            Ok(output) => return AttemptOutcome { result: Ok(output), attempts },
            Err(err) => err,
        };

        if !policy.should_retry(&err, attempts) {
            return AttemptOutcome { result: Err(err), attempts };
        }

        let delay = policy.delay_for(attempts);
        warn!(
            node_id = %ctx.node_id,
            attempt = attempts,
            max_retries = policy.max_retries,
            error = %err,
            "node failed, retrying in {delay:?}"
        );
        ctx.console(
            "warn",
            format!("attempt {attempts} failed: {err}; retrying in {:.3}s", delay.as_secs_f64()),
        );
        tokio::time::sleep(delay).await;
    }
}
