//! Outbound run events.
//!
//! Each run owns a [`tokio::sync::broadcast`] channel. Events are
//! projections of the run state, not the source of truth: a lagging
//! subscriber silently skips what it missed, and the channel closes when the
//! run's dispatch loop exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::{NodeId, RunId, WorkflowId};
use strata_execution::{Consequence, ErrorKind, RunStatus, SkipReason};
use tokio::sync::broadcast;

/// Run lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// Dispatch began.
    RunStarted {
        /// The run.
        run_id: RunId,
        /// The workflow.
        workflow_id: WorkflowId,
        /// Number of nodes in the plan.
        total_nodes: usize,
        /// Number of plan stages.
        total_stages: usize,
    },
    /// A node's input set is complete.
    NodeReady {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
    },
    /// An attempt started on a worker.
    NodeStarted {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Worker slot.
        worker: usize,
    },
    /// An attempt failed and another will follow.
    NodeRetrying {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
        /// The failed attempt.
        attempt: u32,
        /// Failure classification.
        kind: ErrorKind,
        /// Error description.
        error: String,
    },
    /// A node succeeded.
    NodeSucceeded {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
        /// Attempts used.
        attempts: u32,
        /// Worker time across all attempts.
        duration: Duration,
        /// Bytes published.
        output_bytes: u64,
    },
    /// A node failed for good.
    NodeFailed {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
        /// Failure classification.
        kind: ErrorKind,
        /// Error description.
        error: String,
        /// What the engine did about it.
        consequence: Consequence,
    },
    /// A node will not run.
    NodeSkipped {
        /// The run.
        run_id: RunId,
        /// The node.
        node_id: NodeId,
        /// Why.
        reason: SkipReason,
    },
    /// Dispatch paused; in-flight nodes continue.
    RunPaused {
        /// The run.
        run_id: RunId,
    },
    /// Dispatch resumed.
    RunResumed {
        /// The run.
        run_id: RunId,
    },
    /// Cancellation was requested.
    RunCancelling {
        /// The run.
        run_id: RunId,
    },
    /// The run reached a terminal status. Always the last event.
    RunFinished {
        /// The run.
        run_id: RunId,
        /// Final status.
        status: RunStatus,
        /// Wall-clock duration of the run.
        duration: Duration,
    },
}

impl RunEvent {
    /// The run this event belongs to.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeReady { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeRetrying { run_id, .. }
            | Self::NodeSucceeded { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::RunPaused { run_id }
            | Self::RunResumed { run_id }
            | Self::RunCancelling { run_id }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }

    /// The node this event is about, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::NodeReady { node_id, .. }
            | Self::NodeStarted { node_id, .. }
            | Self::NodeRetrying { node_id, .. }
            | Self::NodeSucceeded { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. } => Some(*node_id),
            _ => None,
        }
    }

    /// Returns `true` for [`RunEvent::RunFinished`].
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::RunFinished { .. })
    }
}

/// Broadcast-based event bus for one run.
///
/// If no subscribers are listening, events are dropped.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: RunEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Total number of events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("emitted", &self.total_emitted())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Subscription handle for one run's events.
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<RunEvent>,
}

impl EventSubscriber {
    /// Receive the next event.
    ///
    /// Returns `None` once the run has finished and every buffered event
    /// was read. Events missed through lag are skipped.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    /// Read events until the run finishes or the channel closes.
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let done = event.is_final();
            events.push(event);
            if done {
                break;
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused(run_id: RunId) -> RunEvent {
        RunEvent::RunPaused { run_id }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(paused(RunId::v4()));
        assert_eq!(bus.total_emitted(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_receives_via_try_recv() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        let run_id = RunId::v4();
        bus.emit(paused(run_id));
        assert_eq!(sub.try_recv(), Some(paused(run_id)));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new(16);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();
        bus.emit(paused(RunId::v4()));
        assert!(sub1.try_recv().is_some());
        assert!(sub2.try_recv().is_some());
    }

    #[test]
    fn lagging_subscriber_skips_to_newest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        let runs: Vec<RunId> = (0..5).map(|_| RunId::v4()).collect();
        for &r in &runs {
            bus.emit(paused(r));
        }
        assert_eq!(sub.try_recv().map(|e| e.run_id()), Some(runs[3]));
        assert_eq!(sub.try_recv().map(|e| e.run_id()), Some(runs[4]));
    }

    #[tokio::test]
    async fn recv_ends_when_bus_is_dropped() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe();
        let run_id = RunId::v4();
        bus.emit(paused(run_id));
        drop(bus);
        let events = sub.collect().await;
        assert_eq!(events, vec![paused(run_id)]);
    }

    #[tokio::test]
    async fn collect_stops_at_run_finished() {
        let bus = EventBus::new(16);
        let sub = bus.subscribe();
        let run_id = RunId::v4();
        bus.emit(RunEvent::RunFinished {
            run_id,
            status: RunStatus::Completed,
            duration: Duration::from_millis(5),
        });
        bus.emit(paused(run_id));
        let events = sub.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_final());
    }

    #[test]
    fn events_serialize_with_tag() {
        let node_id = NodeId::v4();
        let event = RunEvent::NodeSkipped {
            run_id: RunId::v4(),
            node_id,
            reason: SkipReason::Upstream { origin: node_id },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_skipped");
        assert_eq!(json["reason"]["reason"], "upstream");
        assert_eq!(event.node_id(), Some(node_id));
    }
}
