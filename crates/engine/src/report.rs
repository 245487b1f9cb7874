//! Final run reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId, WorkflowId};
use strata_execution::{DataPacket, Payload, RunStatus, StatusSnapshot};
use strata_workflow::NodeState;

use crate::error::EngineFault;
use crate::strategy::StrategyKind;

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// The run.
    pub run_id: RunId,
    /// The workflow.
    pub workflow_id: WorkflowId,
    /// Final status.
    pub status: RunStatus,
    /// Strategy the run was configured with.
    pub strategy: StrategyKind,
    /// Plan stages.
    pub stages: Vec<Vec<NodeId>>,
    /// Final per-node status and the error log.
    pub snapshot: StatusSnapshot,
    /// Every published packet, in publish order.
    pub packets: Vec<DataPacket>,
    /// Wall-clock duration.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// When dispatch began.
    pub started_at: DateTime<Utc>,
    /// Highest number of nodes Running at once.
    pub peak_running: usize,
    /// Consistency failure that ended the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<EngineFault>,
}

impl RunReport {
    /// Whether every node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the run was aborted or failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Final state of a node.
    #[must_use]
    pub fn node_state(&self, node: NodeId) -> Option<NodeState> {
        self.snapshot.state_of(node)
    }

    /// Packet published on `(node, port)`.
    #[must_use]
    pub fn packet(&self, node: NodeId, port: &str) -> Option<&DataPacket> {
        self.packets
            .iter()
            .find(|p| p.lineage.producer == node && p.lineage.port == port)
    }

    /// Payload published on `(node, port)`.
    #[must_use]
    pub fn output(&self, node: NodeId, port: &str) -> Option<&Payload> {
        self.packet(node, port).map(|p| &p.payload)
    }

    /// Inline value published on `(node, port)`.
    #[must_use]
    pub fn output_value(&self, node: NodeId, port: &str) -> Option<&serde_json::Value> {
        self.output(node, port).and_then(Payload::as_inline)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
