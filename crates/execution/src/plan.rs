//! Execution planning: builds a stage-grouped schedule from a workflow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId, WorkflowId};
use strata_workflow::{DependencyGraph, ValidationError, WorkflowDefinition};

use crate::error::ExecutionError;

/// Per-node facts recorded by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedNode {
    /// Stage this node belongs to.
    pub stage: usize,
    /// Position in the workflow's declaration order.
    pub declaration_index: usize,
    /// Number of incoming connections.
    pub in_degree: usize,
    /// Distinct direct upstream nodes.
    pub predecessors: Vec<NodeId>,
    /// Distinct direct downstream nodes.
    pub successors: Vec<NodeId>,
    /// Every node a failure here skips: the transitive closure over
    /// failure-propagating connections, in declaration order.
    pub dependents: Vec<NodeId>,
}

/// A pre-computed execution plan derived from a workflow definition.
///
/// Stage `k` holds exactly the nodes whose predecessors all lie in stages
/// before `k`, in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Run this plan belongs to.
    pub run_id: RunId,
    /// Workflow this plan was derived from.
    pub workflow_id: WorkflowId,
    /// Parallel stages in dependency order.
    pub stages: Vec<Vec<NodeId>>,
    /// Per-node facts, in declaration order.
    pub nodes: IndexMap<NodeId, PlannedNode>,
    /// Nodes with no predecessors.
    pub entry_nodes: Vec<NodeId>,
    /// Nodes with no successors.
    pub exit_nodes: Vec<NodeId>,
    /// Structure fingerprint of the workflow at planning time.
    pub fingerprint: u64,
    /// When this plan was created.
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Build an execution plan from a workflow definition.
    ///
    /// The workflow is expected to have passed validation; an empty or cyclic
    /// graph is still rejected here.
    pub fn from_workflow(
        run_id: RunId,
        workflow: &WorkflowDefinition,
    ) -> Result<Self, ExecutionError> {
        if workflow.nodes.is_empty() {
            return Err(ValidationError::EmptyGraph.into());
        }

        let graph = DependencyGraph::from_definition(workflow)?;
        let stages = graph.compute_levels()?;

        let mut stage_of = HashMap::with_capacity(workflow.nodes.len());
        for (k, stage) in stages.iter().enumerate() {
            for &id in stage {
                stage_of.insert(id, k);
            }
        }

        let nodes = workflow
            .nodes
            .iter()
            .enumerate()
            .map(|(declaration_index, node)| {
                let planned = PlannedNode {
                    stage: stage_of.get(&node.id).copied().unwrap_or_default(),
                    declaration_index,
                    in_degree: graph.incoming_connections(node.id).len(),
                    predecessors: graph.predecessors(node.id),
                    successors: graph.successors(node.id),
                    dependents: graph
                        .transitive_dependents(node.id, |c| workflow.propagates_failure(c)),
                };
                (node.id, planned)
            })
            .collect();

        Ok(Self {
            run_id,
            workflow_id: workflow.id,
            stages,
            nodes,
            entry_nodes: graph.entry_nodes(),
            exit_nodes: graph.exit_nodes(),
            fingerprint: workflow.structure_fingerprint(),
            created_at: Utc::now(),
        })
    }

    /// Total number of nodes in the plan.
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Facts recorded for one node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&PlannedNode> {
        self.nodes.get(&id)
    }

    /// Stage index of a node.
    #[must_use]
    pub fn stage_of(&self, id: NodeId) -> Option<usize> {
        self.nodes.get(&id).map(|n| n.stage)
    }

    /// Cascade set of a node; empty for unknown ids.
    #[must_use]
    pub fn dependents_of(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |n| n.dependents.as_slice())
    }

    /// Returns `true` if the plan still describes `workflow`. Parameter-only
    /// edits keep a plan current; structural edits make it stale.
    #[must_use]
    pub fn is_current_for(&self, workflow: &WorkflowDefinition) -> bool {
        self.workflow_id == workflow.id && self.fingerprint == workflow.structure_fingerprint()
    }
}
