//! One node's stay on a worker slot.
//!
//! A worker runs attempts through the execution boundary and consults the
//! recovery handler between them. The slot stays occupied through backoff
//! sleeps. Progress is reported to the dispatch loop over a channel; the
//! loop alone mutates run state.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use strata_core::{NodeId, RunId};
use strata_execution::{DataPacket, ErrorKind};
use strata_runtime::{
    Completion, Invocation, InvocationError, MemoryMeter, NodePlugin, ResourceLimits, invoke,
};
use strata_workflow::{ExhaustedAction, FailurePolicy};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::recovery::{self, Decision};

/// Interim report from a worker.
#[derive(Debug)]
pub(crate) enum Progress {
    /// An attempt is about to run.
    AttemptStarted { node: NodeId, attempt: u32 },
    /// An attempt failed and a retry follows after `delay`.
    AttemptFailed {
        node: NodeId,
        attempt: u32,
        kind: ErrorKind,
        message: String,
        delay: Duration,
    },
}

/// How a node's stay on the worker ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// An attempt succeeded.
    Succeeded { completion: Completion, attempt: u32 },
    /// The last attempt failed and `action` applies.
    Failed {
        error: InvocationError,
        attempt: u32,
        action: ExhaustedAction,
    },
    /// Cancellation stopped the node after `attempt` attempts.
    Interrupted { attempt: u32 },
}

/// Everything a worker needs to run one node.
pub(crate) struct WorkerTask {
    pub run_id: RunId,
    pub node_id: NodeId,
    pub plugin: Arc<dyn NodePlugin>,
    pub policy: FailurePolicy,
    pub idempotent: bool,
    pub inputs: IndexMap<String, Arc<DataPacket>>,
    pub params: IndexMap<String, Value>,
    pub timeout: Option<Duration>,
    pub memory_limit: Option<u64>,
    pub limits: ResourceLimits,
    pub token: CancellationToken,
    pub progress: mpsc::UnboundedSender<Progress>,
}

impl WorkerTask {
    /// Run attempts until one succeeds, retries are exhausted, or the run
    /// is cancelled.
    pub(crate) async fn run(self) -> Outcome {
        let mut attempt = 1;
        loop {
            if self.token.is_cancelled() {
                return Outcome::Interrupted {
                    attempt: attempt - 1,
                };
            }
            let _ = self.progress.send(Progress::AttemptStarted {
                node: self.node_id,
                attempt,
            });

            let invocation = Invocation {
                node_id: self.node_id,
                run_id: self.run_id,
                attempt,
                inputs: self.inputs.clone(),
                params: self.params.clone(),
                token: self.token.child_token(),
                deadline: self.timeout.map(|t| Instant::now() + t),
                memory: MemoryMeter::new(self.memory_limit),
            };

            let error = match invoke(self.plugin.as_ref(), invocation, &self.limits).await {
                Ok(completion) => return Outcome::Succeeded { completion, attempt },
                Err(error) => error,
            };

            match recovery::decide(&self.policy, &error, attempt, self.idempotent) {
                Decision::Retry { delay } => {
                    tracing::warn!(
                        node = %self.node_id,
                        attempt,
                        max_attempts = self.policy.retry.attempts(),
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, retrying"
                    );
                    let _ = self.progress.send(Progress::AttemptFailed {
                        node: self.node_id,
                        attempt,
                        kind: error.kind(),
                        message: error.to_string(),
                        delay,
                    });
                    if !recovery::sleep_unless_cancelled(delay, &self.token).await {
                        return Outcome::Interrupted { attempt };
                    }
                    attempt += 1;
                }
                Decision::Exhausted(action) => {
                    return Outcome::Failed {
                        error,
                        attempt,
                        action,
                    };
                }
                Decision::Interrupted => return Outcome::Interrupted { attempt },
            }
        }
    }
}
