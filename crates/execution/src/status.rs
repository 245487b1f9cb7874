//! Run-level status tracking.

use serde::{Deserialize, Serialize};

/// The overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted but not yet dispatching.
    Created,
    /// Actively dispatching nodes.
    Running,
    /// No new dispatch; in-flight nodes finish.
    Paused,
    /// Cancellation requested; waiting for in-flight nodes to drain.
    Cancelling,
    /// Every node reached a terminal state and none failed.
    Completed,
    /// Every node reached a terminal state; at least one failed and its
    /// dependents were skipped.
    CompletedWithFailures,
    /// Stopped by a user cancellation.
    Cancelled,
    /// Stopped by a node's abort-workflow decision.
    Aborted,
    /// Stopped by an engine-internal fault.
    Failed,
}

impl RunStatus {
    /// Returns `true` if the run has reached a final state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed
                | Self::CompletedWithFailures
                | Self::Cancelled
                | Self::Aborted
                | Self::Failed
        )
    }

    /// Returns `true` if the run is currently doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Cancelling)
    }

    /// Returns `true` if the run finished without any node failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` if the run ended because something went wrong.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Aborted | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Cancelling => write!(f, "cancelling"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithFailures => write!(f, "completed_with_failures"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::CompletedWithFailures.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Created.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert!(!RunStatus::Cancelling.is_terminal());
    }

    #[test]
    fn active_states() {
        assert!(RunStatus::Running.is_active());
        assert!(RunStatus::Paused.is_active());
        assert!(RunStatus::Cancelling.is_active());
        assert!(!RunStatus::Created.is_active());
        assert!(!RunStatus::Completed.is_active());
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        assert!(!RunStatus::Cancelled.is_failure());
        assert!(!RunStatus::CompletedWithFailures.is_failure());
        assert!(RunStatus::Aborted.is_failure());
        assert!(RunStatus::Failed.is_failure());
    }

    #[test]
    fn display_matches_serde() {
        for status in [
            RunStatus::Created,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Cancelling,
            RunStatus::Completed,
            RunStatus::CompletedWithFailures,
            RunStatus::Cancelled,
            RunStatus::Aborted,
            RunStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
