//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Fatal` and `Config` are never retried.
/// - Every other variant is retried while the node's retry policy has
///   attempts left and [`NodeError::error_type`] passes its filter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The node's configuration or credentials are unusable.
    #[error("invalid node configuration: {0}")]
    Config(String),

    /// A single attempt exceeded the node timeout.
    #[error("node timed out: {0}")]
    Timeout(String),

    /// An external integration call failed.
    #[error("{error_type} integration error: {message}")]
    Integration { error_type: String, message: String },
}

impl NodeError {
    /// Convenience constructor for integration failures.
    pub fn integration(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integration {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Stable identifier matched against `retry_on_error_types`.
    pub fn error_type(&self) -> &str {
        match self {
            Self::Retryable(_) => "retryable",
            Self::Fatal(_) => "fatal",
            Self::Config(_) => "config",
            Self::Timeout(_) => "timeout",
            Self::Integration { error_type, .. } => error_type,
        }
    }

    /// Whether the variant may be retried at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_) | Self::Config(_))
    }

    /// The bare message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(m) | Self::Fatal(m) | Self::Config(m) | Self::Timeout(m) => m,
            Self::Integration { message, .. } => message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_config_are_not_retryable() {
        assert!(!NodeError::Fatal("x".into()).is_retryable());
        assert!(!NodeError::Config("x".into()).is_retryable());
        assert!(NodeError::Timeout("x".into()).is_retryable());
        assert!(NodeError::integration("http_5xx", "bad gateway").is_retryable());
    }

    #[test]
    fn integration_error_type_is_caller_defined() {
        let err = NodeError::integration("network", "connection reset");
        assert_eq!(err.error_type(), "network");
        assert_eq!(err.message(), "connection reset");
        assert_eq!(err.to_string(), "network integration error: connection reset");
    }
}
