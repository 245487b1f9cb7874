//! Run state tracking for workflows and individual nodes.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId, WorkflowId};
use strata_workflow::NodeState;

use crate::attempt::NodeAttempt;
use crate::error::ExecutionError;
use crate::record::ErrorRecord;
use crate::status::RunStatus;
use crate::transition::{validate_node_transition, validate_run_transition};

/// Why a node ended `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The run was cancelled before or while the node ran.
    Cancelled,
    /// The run was aborted by a failure elsewhere.
    Aborted {
        /// The node whose failure aborted the run.
        origin: NodeId,
    },
    /// An upstream node failed or was skipped over a propagating connection.
    Upstream {
        /// The failed or skipped node the cascade started from.
        origin: NodeId,
    },
    /// The node is disabled in the workflow.
    Disabled,
}

impl SkipReason {
    /// The node that caused the skip, if any.
    #[must_use]
    pub fn origin(&self) -> Option<NodeId> {
        match self {
            Self::Aborted { origin } | Self::Upstream { origin } => Some(*origin),
            Self::Cancelled | Self::Disabled => None,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Aborted { origin } => write!(f, "run aborted by node {origin}"),
            Self::Upstream { origin } => write!(f, "upstream node {origin} did not succeed"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// The run state of a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunState {
    /// Current state of the node.
    pub state: NodeState,
    /// All attempts made to execute this node.
    pub attempts: Vec<NodeAttempt>,
    /// Set when the node ended `Skipped`.
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    /// When the node became ready.
    #[serde(default)]
    pub ready_at: Option<DateTime<Utc>>,
    /// When this node started its first attempt.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When this node reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error message if the node failed.
    #[serde(default)]
    pub error_message: Option<String>,
}

impl NodeRunState {
    /// Create a new node run state in the Pending state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: NodeState::Pending,
            attempts: Vec::new(),
            skip_reason: None,
            ready_at: None,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Number of attempts made so far.
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Get the latest attempt, if any.
    #[must_use]
    pub fn latest_attempt(&self) -> Option<&NodeAttempt> {
        self.attempts.last()
    }

    /// Transition to a new state, validating the transition.
    pub fn transition_to(&mut self, new_state: NodeState) -> Result<(), ExecutionError> {
        validate_node_transition(self.state, new_state)?;
        self.state = new_state;

        if new_state == NodeState::Ready {
            self.ready_at = Some(Utc::now());
        }
        if new_state == NodeState::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }

        Ok(())
    }

    /// Transition to `Skipped` with a reason.
    pub fn skip(&mut self, reason: SkipReason) -> Result<(), ExecutionError> {
        self.transition_to(NodeState::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }

    /// Clear all progress so the node can take part in a fresh run.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for NodeRunState {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete state of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique identifier for this run.
    pub run_id: RunId,
    /// The workflow being run.
    pub workflow_id: WorkflowId,
    /// Current run status.
    pub status: RunStatus,
    /// Per-node states, in declaration order.
    pub nodes: IndexMap<NodeId, NodeRunState>,
    /// Failure records in the order they were observed.
    pub errors: Vec<ErrorRecord>,
    /// Bumped on each state change.
    pub version: u64,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the run started dispatching.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Total retry attempts across all nodes.
    pub total_retries: u32,
    /// Total output bytes across all nodes.
    pub total_output_bytes: u64,
}

impl RunState {
    /// Create a new run state with every node Pending.
    #[must_use]
    pub fn new(run_id: RunId, workflow_id: WorkflowId, node_ids: &[NodeId]) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow_id,
            status: RunStatus::Created,
            nodes: node_ids.iter().map(|&id| (id, NodeRunState::new())).collect(),
            errors: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            total_retries: 0,
            total_output_bytes: 0,
        }
    }

    /// Get a node's run state.
    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<&NodeRunState> {
        self.nodes.get(&node_id)
    }

    /// Current state of a node.
    #[must_use]
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.get(&node_id).map(|n| n.state)
    }

    /// Get a node's run state mutably.
    pub fn node_mut(&mut self, node_id: NodeId) -> Result<&mut NodeRunState, ExecutionError> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(ExecutionError::NodeNotFound(node_id))
    }

    /// Transition a node, validating the move and bumping the version.
    pub fn transition_node(
        &mut self,
        node_id: NodeId,
        new_state: NodeState,
    ) -> Result<(), ExecutionError> {
        self.node_mut(node_id)?.transition_to(new_state)?;
        self.touch();
        Ok(())
    }

    /// Skip a node with a reason.
    pub fn skip_node(&mut self, node_id: NodeId, reason: SkipReason) -> Result<(), ExecutionError> {
        self.node_mut(node_id)?.skip(reason)?;
        self.touch();
        Ok(())
    }

    /// Append a failure record.
    pub fn record_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
        self.touch();
    }

    /// Returns `true` if all nodes are in terminal states.
    #[must_use]
    pub fn all_nodes_terminal(&self) -> bool {
        self.nodes.values().all(|ns| ns.state.is_terminal())
    }

    /// IDs of nodes in `state`, in declaration order.
    #[must_use]
    pub fn nodes_in(&self, state: NodeState) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, ns)| ns.state == state)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Number of nodes currently Running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.nodes.values().filter(|ns| ns.state.is_active()).count()
    }

    /// Returns `true` if any node ended `Failed`.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.nodes.values().any(|ns| ns.state.is_failure())
    }

    /// Transition the run status, validating the transition and bumping the version.
    pub fn transition_status(&mut self, new_status: RunStatus) -> Result<(), ExecutionError> {
        validate_run_transition(self.status, new_status)?;
        self.status = new_status;
        if new_status == RunStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if new_status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.touch();
        Ok(())
    }

    /// Build the caller-facing view of this run.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.run_id,
            workflow_id: self.workflow_id,
            status: self.status,
            nodes: self
                .nodes
                .iter()
                .map(|(&node_id, ns)| NodeStatus {
                    node_id,
                    state: ns.state,
                    attempts: ns.attempt_count(),
                    skip_reason: ns.skip_reason,
                    error: ns.error_message.clone(),
                })
                .collect(),
            errors: self.errors.clone(),
            total_retries: self.total_retries,
            total_output_bytes: self.total_output_bytes,
            version: self.version,
            taken_at: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Status of one node inside a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// The node.
    pub node_id: NodeId,
    /// Its current state.
    pub state: NodeState,
    /// Attempts made so far.
    pub attempts: u32,
    /// Why it was skipped, if it was.
    #[serde(default)]
    pub skip_reason: Option<SkipReason>,
    /// Last error message, if any attempt failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Point-in-time, per-node view of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// The run.
    pub run_id: RunId,
    /// The workflow being run.
    pub workflow_id: WorkflowId,
    /// Run status at snapshot time.
    pub status: RunStatus,
    /// Per-node status, in declaration order.
    pub nodes: Vec<NodeStatus>,
    /// Failure records so far.
    pub errors: Vec<ErrorRecord>,
    /// Retries so far.
    pub total_retries: u32,
    /// Bytes published so far.
    pub total_output_bytes: u64,
    /// State version the snapshot was taken at.
    pub version: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Status of one node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&NodeStatus> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    /// Current state of one node.
    #[must_use]
    pub fn state_of(&self, id: NodeId) -> Option<NodeState> {
        self.node(id).map(|n| n.state)
    }

    /// Number of nodes in `state`.
    #[must_use]
    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    /// Failure records for one node.
    pub fn errors_for(&self, id: NodeId) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(move |e| e.node_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Consequence, ErrorKind};

    fn make_state() -> (RunState, NodeId, NodeId) {
        let a = NodeId::v4();
        let b = NodeId::v4();
        let state = RunState::new(RunId::v4(), WorkflowId::v4(), &[a, b]);
        (state, a, b)
    }

    #[test]
    fn new_run_state() {
        let (state, a, b) = make_state();
        assert_eq!(state.status, RunStatus::Created);
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.node_state(a), Some(NodeState::Pending));
        assert_eq!(state.node_state(b), Some(NodeState::Pending));
        assert_eq!(state.version, 0);
    }

    #[test]
    fn node_walks_to_success() {
        let (mut state, a, _) = make_state();
        state.transition_node(a, NodeState::Ready).unwrap();
        state.transition_node(a, NodeState::Running).unwrap();
        assert_eq!(state.running_count(), 1);
        state.transition_node(a, NodeState::Succeeded).unwrap();

        let node = state.node(a).unwrap();
        assert!(node.ready_at.is_some());
        assert!(node.started_at.is_some());
        assert!(node.completed_at.is_some());
        assert_eq!(state.version, 3);
    }

    #[test]
    fn invalid_node_transition_is_rejected() {
        let (mut state, a, _) = make_state();
        let err = state.transition_node(a, NodeState::Succeeded).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidTransition { .. }));
        assert_eq!(state.node_state(a), Some(NodeState::Pending));
    }

    #[test]
    fn unknown_node_is_reported() {
        let (mut state, _, _) = make_state();
        let err = state.transition_node(NodeId::v4(), NodeState::Ready).unwrap_err();
        assert!(matches!(err, ExecutionError::NodeNotFound(_)));
    }

    #[test]
    fn skip_records_reason() {
        let (mut state, a, b) = make_state();
        state
            .skip_node(b, SkipReason::Upstream { origin: a })
            .unwrap();
        let node = state.node(b).unwrap();
        assert_eq!(node.state, NodeState::Skipped);
        assert_eq!(node.skip_reason.and_then(|r| r.origin()), Some(a));
    }

    #[test]
    fn terminal_skip_cannot_be_skipped_again() {
        let (mut state, a, _) = make_state();
        state.skip_node(a, SkipReason::Cancelled).unwrap();
        assert!(state.skip_node(a, SkipReason::Cancelled).is_err());
    }

    #[test]
    fn all_nodes_terminal_and_failures() {
        let (mut state, a, b) = make_state();
        assert!(!state.all_nodes_terminal());
        for id in [a, b] {
            state.transition_node(id, NodeState::Ready).unwrap();
            state.transition_node(id, NodeState::Running).unwrap();
        }
        state.transition_node(a, NodeState::Succeeded).unwrap();
        state.transition_node(b, NodeState::Failed).unwrap();
        assert!(state.all_nodes_terminal());
        assert!(state.has_failures());
        assert_eq!(state.nodes_in(NodeState::Failed), vec![b]);
    }

    #[test]
    fn status_transitions_stamp_times() {
        let (mut state, _, _) = make_state();
        state.transition_status(RunStatus::Running).unwrap();
        assert!(state.started_at.is_some());
        state.transition_status(RunStatus::Completed).unwrap();
        assert!(state.completed_at.is_some());
        assert!(state.transition_status(RunStatus::Running).is_err());
    }

    #[test]
    fn snapshot_reflects_state() {
        let (mut state, a, b) = make_state();
        state.transition_node(a, NodeState::Ready).unwrap();
        state.skip_node(b, SkipReason::Disabled).unwrap();
        state.record_error(ErrorRecord::new(
            a,
            1,
            ErrorKind::Execution,
            "boom",
            Consequence::Retried,
        ));

        let snap = state.snapshot();
        assert_eq!(snap.state_of(a), Some(NodeState::Ready));
        assert_eq!(snap.node(b).unwrap().skip_reason, Some(SkipReason::Disabled));
        assert_eq!(snap.count(NodeState::Skipped), 1);
        assert_eq!(snap.errors_for(a).count(), 1);
        assert_eq!(snap.version, state.version);
    }

    #[test]
    fn reset_clears_progress() {
        let mut node = NodeRunState::new();
        node.transition_to(NodeState::Ready).unwrap();
        node.attempts.push(NodeAttempt::new(1, 0));
        node.reset();
        assert_eq!(node.state, NodeState::Pending);
        assert!(node.attempts.is_empty());
    }

    #[test]
    fn skip_reason_display() {
        let origin = NodeId::nil();
        assert_eq!(SkipReason::Cancelled.to_string(), "cancelled");
        assert!(
            SkipReason::Upstream { origin }
                .to_string()
                .contains(&origin.to_string())
        );
    }
}
