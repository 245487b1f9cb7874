//! Inter-node data flow for one run.
//!
//! The [`DataFlowManager`] owns every packet of a run. Producers publish once
//! per output port; the manager routes a shared reference to each connected
//! input port and reports a consumer ready exactly once, when its last
//! connected port settles. Until then [`inputs_for`](DataFlowManager::inputs_for)
//! refuses to hand out a partial input set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use strata_core::{NodeId, RunId};
use strata_workflow::{DataType, WorkflowDefinition};

use crate::error::ExecutionError;
use crate::packet::{DataPacket, Lineage, Payload};

/// A settled input port: either a packet or a tolerated absence.
#[derive(Debug, Clone)]
enum Slot {
    Packet(Arc<DataPacket>),
    Absent,
}

type PortKey = (NodeId, String);

/// Append-only packet store and readiness tracker for a single run.
#[derive(Debug)]
pub struct DataFlowManager {
    run_id: RunId,
    /// Connected input ports per consumer, in connection order.
    expected: HashMap<NodeId, Vec<String>>,
    /// Output port to every input port it feeds.
    routes: HashMap<PortKey, Vec<PortKey>>,
    /// Settled input ports per consumer.
    settled: HashMap<NodeId, IndexMap<String, Slot>>,
    /// Every published packet, in publish order.
    store: IndexMap<PortKey, Arc<DataPacket>>,
    fired: HashSet<NodeId>,
    skipped: HashSet<NodeId>,
    sequence: u64,
    total_bytes: u64,
}

impl DataFlowManager {
    /// Build the routing table for `workflow`.
    #[must_use]
    pub fn new(run_id: RunId, workflow: &WorkflowDefinition) -> Self {
        let mut expected: HashMap<NodeId, Vec<String>> = HashMap::new();
        let mut routes: HashMap<PortKey, Vec<PortKey>> = HashMap::new();
        for node in &workflow.nodes {
            expected.entry(node.id).or_default();
        }
        for conn in &workflow.connections {
            expected
                .entry(conn.to_node)
                .or_default()
                .push(conn.to_port.clone());
            routes
                .entry((conn.from_node, conn.from_port.clone()))
                .or_default()
                .push((conn.to_node, conn.to_port.clone()));
        }
        Self {
            run_id,
            expected,
            routes,
            settled: HashMap::new(),
            store: IndexMap::new(),
            fired: HashSet::new(),
            skipped: HashSet::new(),
            sequence: 0,
            total_bytes: 0,
        }
    }

    /// The run this manager belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Nodes with no connected inputs, marked ready. Call once at run start;
    /// later calls return only nodes not yet reported.
    pub fn initially_ready(&mut self, order: &[NodeId]) -> Vec<NodeId> {
        order
            .iter()
            .copied()
            .filter(|id| self.expected.get(id).is_some_and(Vec::is_empty))
            .filter(|id| !self.skipped.contains(id) && self.fired.insert(*id))
            .collect()
    }

    /// Store a new packet for `(producer, port)`.
    ///
    /// Fails if the producer was skipped or already published on that port.
    pub fn publish(
        &mut self,
        producer: NodeId,
        port: &str,
        payload: Payload,
        schema: DataType,
        substituted: bool,
    ) -> Result<Arc<DataPacket>, ExecutionError> {
        if self.skipped.contains(&producer) {
            return Err(ExecutionError::SkippedProducer(producer));
        }
        let key = (producer, port.to_owned());
        if self.store.contains_key(&key) {
            return Err(ExecutionError::DuplicatePacket {
                node: producer,
                port: port.to_owned(),
            });
        }

        self.sequence += 1;
        let packet = Arc::new(DataPacket {
            payload,
            lineage: Lineage {
                producer,
                port: port.to_owned(),
                run_id: self.run_id,
                sequence: self.sequence,
                schema,
                substituted,
                produced_at: Utc::now(),
            },
        });
        self.total_bytes += packet.size_bytes();
        self.store.insert(key, Arc::clone(&packet));
        tracing::trace!(
            node = %producer,
            port,
            sequence = self.sequence,
            bytes = packet.size_bytes(),
            "packet published"
        );
        Ok(packet)
    }

    /// Route `packet` to every input port its producer port feeds.
    ///
    /// Returns the consumers whose input set became complete with this
    /// delivery, in route order. Each consumer is returned at most once per run.
    pub fn deliver(&mut self, packet: &Arc<DataPacket>) -> Result<Vec<NodeId>, ExecutionError> {
        let key = (packet.lineage.producer, packet.lineage.port.clone());
        let targets = self.routes.get(&key).cloned().unwrap_or_default();
        let mut ready = Vec::new();
        for (node, port) in targets {
            if let Some(id) = self.settle(node, &port, Slot::Packet(Arc::clone(packet)))? {
                ready.push(id);
            }
        }
        Ok(ready)
    }

    /// Settle one input port without a packet, for a tolerated upstream
    /// failure. Returns the consumer if its input set became complete.
    pub fn deliver_absent(
        &mut self,
        consumer: NodeId,
        port: &str,
    ) -> Result<Option<NodeId>, ExecutionError> {
        self.settle(consumer, port, Slot::Absent)
    }

    /// Record that `node` will not run. It may no longer publish and will
    /// never be reported ready.
    pub fn mark_skipped(&mut self, node: NodeId) {
        self.skipped.insert(node);
    }

    /// Returns `true` once the node's input set is complete.
    #[must_use]
    pub fn is_ready(&self, node: NodeId) -> bool {
        self.fired.contains(&node)
    }

    /// The complete input set of a ready node, keyed by input port.
    /// Tolerated absences are left out.
    pub fn inputs_for(
        &self,
        node: NodeId,
    ) -> Result<IndexMap<String, Arc<DataPacket>>, ExecutionError> {
        if !self.fired.contains(&node) {
            return Err(ExecutionError::InputsIncomplete(node));
        }
        let Some(slots) = self.settled.get(&node) else {
            return Ok(IndexMap::new());
        };
        Ok(slots
            .iter()
            .filter_map(|(port, slot)| match slot {
                Slot::Packet(p) => Some((port.clone(), Arc::clone(p))),
                Slot::Absent => None,
            })
            .collect())
    }

    /// The packet published on `(producer, port)`, if any.
    #[must_use]
    pub fn packet(&self, producer: NodeId, port: &str) -> Option<Arc<DataPacket>> {
        self.store.get(&(producer, port.to_owned())).cloned()
    }

    /// Every packet in publish order.
    pub fn packets(&self) -> impl Iterator<Item = &Arc<DataPacket>> {
        self.store.values()
    }

    /// Number of published packets.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.store.len()
    }

    /// Bytes published so far in this run.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn settle(
        &mut self,
        node: NodeId,
        port: &str,
        slot: Slot,
    ) -> Result<Option<NodeId>, ExecutionError> {
        let Some(expected) = self.expected.get(&node) else {
            return Err(ExecutionError::NodeNotFound(node));
        };
        if !expected.iter().any(|p| p == port) {
            return Err(ExecutionError::UnexpectedPort {
                node,
                port: port.to_owned(),
            });
        }
        let expected_len = expected.len();

        let slots = self.settled.entry(node).or_default();
        if slots.contains_key(port) {
            return Err(ExecutionError::DuplicateDelivery {
                node,
                port: port.to_owned(),
            });
        }
        slots.insert(port.to_owned(), slot);

        let complete = slots.len() == expected_len;
        if complete && !self.skipped.contains(&node) && self.fired.insert(node) {
            tracing::trace!(node = %node, "input set complete");
            return Ok(Some(node));
        }
        Ok(None)
    }
}
