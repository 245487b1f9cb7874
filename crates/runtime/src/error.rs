//! Plugin, invocation, and registry error types.

use std::time::Duration;

use strata_core::TypeTag;
use strata_execution::ErrorKind;

use crate::limits::LimitExceeded;

/// Error returned by a plugin's `execute`.
///
/// Distinguishes retryable from fatal errors so the engine can decide retry
/// policy without the plugin needing to know about backoff.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Transient failure. The engine may retry based on the node's policy.
    #[error("retryable: {error}")]
    Retryable {
        /// Human-readable error message.
        error: String,
        /// Suggested delay before retry (the engine may use a longer one).
        backoff_hint: Option<Duration>,
    },

    /// Permanent failure. Never retried.
    #[error("fatal: {error}")]
    Fatal {
        /// Human-readable error message.
        error: String,
    },

    /// Inputs or parameters were rejected before work began. Never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// The plugin observed the cancellation token and stopped.
    #[error("cancelled")]
    Cancelled,

    /// A resource ceiling was hit.
    #[error(transparent)]
    ResourceExhausted(#[from] LimitExceeded),
}

impl PluginError {
    /// Create a retryable error with no backoff hint.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable {
            error: msg.into(),
            backoff_hint: None,
        }
    }

    /// Create a retryable error with a suggested backoff duration.
    pub fn retryable_with_backoff(msg: impl Into<String>, backoff: Duration) -> Self {
        Self::Retryable {
            error: msg.into(),
            backoff_hint: Some(backoff),
        }
    }

    /// Create a fatal (non-retryable) error.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal { error: msg.into() }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Returns `true` if the engine should consider retrying this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::ResourceExhausted(_))
    }

    /// Returns `true` if this error is permanent and should never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::Validation(_))
    }

    /// Extract the backoff hint, if present.
    pub fn backoff_hint(&self) -> Option<Duration> {
        match self {
            Self::Retryable { backoff_hint, .. } => *backoff_hint,
            _ => None,
        }
    }
}

/// Outcome of a failed pass through the execution boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvocationError {
    /// The plugin returned an error.
    #[error("execution failed: {0}")]
    Execution(PluginError),

    /// The wall-clock deadline passed before the plugin returned.
    #[error("timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before the deadline fired.
        elapsed: Duration,
    },

    /// A memory or output ceiling was exceeded.
    #[error(transparent)]
    ResourceExhausted(LimitExceeded),

    /// The invocation stopped because the run was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The plugin's outputs do not match its declared output ports.
    #[error("output ports do not match declaration: missing {missing:?}, undeclared {undeclared:?}")]
    OutputMismatch {
        /// Required ports the plugin did not produce.
        missing: Vec<String>,
        /// Ports the plugin produced but does not declare.
        undeclared: Vec<String>,
    },
}

impl InvocationError {
    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Execution(e) => e.is_retryable(),
            Self::Timeout { .. } | Self::ResourceExhausted(_) => true,
            Self::Cancelled | Self::OutputMismatch { .. } => false,
        }
    }

    /// Returns `true` for a timeout or an exceeded ceiling, the two outcomes
    /// that a non-idempotent node may not retry.
    pub fn is_limit_violation(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ResourceExhausted(_))
    }

    /// Classification recorded in the run's error log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Execution(_) | Self::OutputMismatch { .. } => ErrorKind::Execution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Suggested delay before the next attempt.
    pub fn backoff_hint(&self) -> Option<Duration> {
        match self {
            Self::Execution(e) => e.backoff_hint(),
            _ => None,
        }
    }
}

impl From<PluginError> for InvocationError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Cancelled => Self::Cancelled,
            PluginError::ResourceExhausted(limit) => Self::ResourceExhausted(limit),
            other => Self::Execution(other),
        }
    }
}

/// Errors from building or querying the plugin registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No plugin is registered for a type tag.
    #[error("no plugin registered for type `{0}`")]
    UnknownType(TypeTag),

    /// Two plugins claim the same type tag.
    #[error("type `{0}` registered more than once")]
    DuplicateType(TypeTag),

    /// A node's declared ports disagree with its plugin's descriptor.
    #[error("node `{node}` does not match plugin `{type_tag}`: {detail}")]
    PortContract {
        /// The node's display name.
        node: String,
        /// The plugin type.
        type_tag: TypeTag,
        /// What differs.
        detail: String,
    },
}
