//! Node execution state tracking.

use serde::{Deserialize, Serialize};

/// The execution state of a single node within a workflow run.
///
/// Progress is monotonic: `Pending → Ready → Running → {Succeeded, Failed,
/// Skipped}`, with `Pending`/`Ready` allowed to jump straight to `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting for predecessors.
    Pending,
    /// Every input settled; eligible for dispatch.
    Ready,
    /// Occupying a worker slot.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Every attempt failed.
    Failed,
    /// Will not run (or was interrupted) in this run.
    Skipped,
}

impl NodeState {
    /// Returns `true` if the node has reached a final state and will not transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns `true` if the node is currently doing work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` if the node completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns `true` if the node ended in a failure state.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(NodeState::Succeeded.is_terminal());
        assert!(NodeState::Failed.is_terminal());
        assert!(NodeState::Skipped.is_terminal());

        assert!(!NodeState::Pending.is_terminal());
        assert!(!NodeState::Ready.is_terminal());
        assert!(!NodeState::Running.is_terminal());
    }

    #[test]
    fn active_success_failure() {
        assert!(NodeState::Running.is_active());
        assert!(!NodeState::Ready.is_active());
        assert!(NodeState::Succeeded.is_success());
        assert!(!NodeState::Skipped.is_success());
        assert!(NodeState::Failed.is_failure());
        assert!(!NodeState::Skipped.is_failure());
    }

    #[test]
    fn display_matches_serde() {
        for state in [
            NodeState::Pending,
            NodeState::Ready,
            NodeState::Running,
            NodeState::Succeeded,
            NodeState::Failed,
            NodeState::Skipped,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
