//! The per-run dispatch loop.
//!
//! One task per run owns the [`RunState`] and the [`DataFlowManager`].
//! Workers report back over channels; only this loop mutates state, so every
//! transition happens in one place and in one order.
//!
//! Each turn the loop dispatches as many Ready nodes as the pool and the
//! strategy allow, then waits for the next worker report, completion, or
//! control command.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use strata_core::{NodeId, RunId};
use strata_execution::{
    Consequence, DataFlowManager, ErrorKind, ErrorRecord, ExecutionPlan, NodeAttempt, Payload,
    RunState, RunStatus, SkipReason, StatusSnapshot,
};
use strata_runtime::{Completion, InvocationError, PluginRegistry, ResourceLimits};
use strata_workflow::{ExhaustedAction, NodeState, WorkflowDefinition};
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::error::EngineFault;
use crate::events::{EventBus, RunEvent};
use crate::recovery;
use crate::report::RunReport;
use crate::strategy::{Candidate, CompletionSample, Occupancy, SchedulingStrategy, Selection};
use crate::worker::{Outcome, Progress, WorkerTask};

/// Control request from the engine API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Pause,
    Resume,
    Cancel,
}

/// Why dispatch stopped for good.
#[derive(Debug)]
enum Halt {
    Cancelled,
    Aborted { origin: NodeId },
    Faulted(EngineFault),
}

/// A node occupying a worker slot.
#[derive(Debug, Clone, Copy)]
struct Slot {
    node: NodeId,
    worker: usize,
    since: Instant,
    memory: u64,
    rows: u64,
}

/// Fixed-size worker pool bookkeeping.
#[derive(Debug)]
struct WorkerPool {
    busy: Vec<bool>,
    busy_time: Vec<Duration>,
    memory_in_use: u64,
    rows_in_flight: u64,
}

impl WorkerPool {
    fn new(capacity: usize) -> Self {
        Self {
            busy: vec![false; capacity],
            busy_time: vec![Duration::ZERO; capacity],
            memory_in_use: 0,
            rows_in_flight: 0,
        }
    }

    fn has_free(&self) -> bool {
        self.busy.iter().any(|b| !b)
    }

    fn occupy(&mut self, slot: &Slot) {
        self.busy[slot.worker] = true;
        self.memory_in_use += slot.memory;
        self.rows_in_flight += slot.rows;
    }

    fn release(&mut self, slot: &Slot) -> Duration {
        let held = slot.since.elapsed();
        self.busy[slot.worker] = false;
        self.busy_time[slot.worker] += held;
        self.memory_in_use = self.memory_in_use.saturating_sub(slot.memory);
        self.rows_in_flight = self.rows_in_flight.saturating_sub(slot.rows);
        held
    }
}

/// Everything a dispatch loop is built from.
pub(crate) struct RunSetup {
    pub run_id: RunId,
    pub workflow: Arc<WorkflowDefinition>,
    pub plan: Arc<ExecutionPlan>,
    pub registry: Arc<PluginRegistry>,
    pub config: RunConfig,
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub status: watch::Sender<StatusSnapshot>,
    pub events: Arc<EventBus>,
    pub report: Arc<Mutex<Option<RunReport>>>,
}

pub(crate) struct Scheduler {
    run_id: RunId,
    workflow: Arc<WorkflowDefinition>,
    plan: Arc<ExecutionPlan>,
    registry: Arc<PluginRegistry>,
    config: RunConfig,
    state: RunState,
    flow: DataFlowManager,
    strategy: Box<dyn SchedulingStrategy>,
    ready: Vec<NodeId>,
    pool: WorkerPool,
    tasks: JoinSet<Outcome>,
    in_flight: HashMap<task::Id, Slot>,
    progress_tx: mpsc::UnboundedSender<Progress>,
    progress_rx: mpsc::UnboundedReceiver<Progress>,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    status: watch::Sender<StatusSnapshot>,
    events: Arc<EventBus>,
    report: Arc<Mutex<Option<RunReport>>>,
    token: CancellationToken,
    halt: Option<Halt>,
    started: Instant,
    started_at: DateTime<Utc>,
    peak_running: usize,
}

impl Scheduler {
    pub(crate) fn new(setup: RunSetup) -> Self {
        let order: Vec<NodeId> = setup.plan.nodes.keys().copied().collect();
        let state = RunState::new(setup.run_id, setup.workflow.id, &order);
        let flow = DataFlowManager::new(setup.run_id, &setup.workflow);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            run_id: setup.run_id,
            strategy: setup.config.strategy.build(),
            pool: WorkerPool::new(setup.config.max_concurrency),
            workflow: setup.workflow,
            plan: setup.plan,
            registry: setup.registry,
            config: setup.config,
            state,
            flow,
            ready: Vec::new(),
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            progress_tx,
            progress_rx,
            commands: setup.commands,
            commands_open: true,
            status: setup.status,
            events: setup.events,
            report: setup.report,
            token: CancellationToken::new(),
            halt: None,
            started: Instant::now(),
            started_at: Utc::now(),
            peak_running: 0,
        }
    }

    /// Drive the run to a terminal status.
    pub(crate) async fn run(mut self) -> RunReport {
        self.start();
        loop {
            self.dispatch();
            if self.tasks.is_empty() {
                if self.halt.is_some() || self.state.all_nodes_terminal() {
                    break;
                }
                if self.state.status == RunStatus::Paused {
                    if !self.commands_open {
                        tracing::info!(run_id = %self.run_id, "controller gone while paused, cancelling");
                        self.cancel();
                        continue;
                    }
                } else {
                    self.fault(None, "no node is running and none can be dispatched");
                    break;
                }
            }

            tokio::select! {
                biased;
                Some(progress) = self.progress_rx.recv() => self.on_progress(progress),
                Some(joined) = self.tasks.join_next_with_id() => self.on_joined(joined),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => self.on_command(command),
                    None => self.commands_open = false,
                },
            }
            self.publish_status();
        }
        self.finish()
    }

    fn start(&mut self) {
        if let Err(e) = self.state.transition_status(RunStatus::Running) {
            self.fault(None, e.to_string());
            return;
        }
        self.state.started_at = Some(Utc::now());
        tracing::info!(
            run_id = %self.run_id,
            workflow_id = %self.workflow.id,
            nodes = self.plan.total_nodes(),
            stages = self.plan.stages.len(),
            strategy = self.strategy.name(),
            max_concurrency = self.config.max_concurrency,
            "run started"
        );
        self.events.emit(RunEvent::RunStarted {
            run_id: self.run_id,
            workflow_id: self.workflow.id,
            total_nodes: self.plan.total_nodes(),
            total_stages: self.plan.stages.len(),
        });

        let workflow = Arc::clone(&self.workflow);
        for node in workflow.nodes.iter().filter(|n| !n.enabled) {
            if self.skip(node.id, SkipReason::Disabled) {
                let _ = self.cascade(node.id);
            }
        }

        let order: Vec<NodeId> = self.plan.nodes.keys().copied().collect();
        for id in self.flow.initially_ready(&order) {
            self.mark_ready(id);
        }
        self.publish_status();
    }

    // ── dispatch ───────────────────────────────────────────────────────────

    fn dispatch(&mut self) {
        if self.halt.is_some() || self.state.status != RunStatus::Running {
            return;
        }
        while self.pool.has_free() && !self.ready.is_empty() {
            let candidates = self.candidates();
            if candidates.is_empty() {
                break;
            }
            let occupancy = self.occupancy();
            let Some(selection) = self.strategy.select(&candidates, &occupancy) else {
                break;
            };
            let chosen = candidates
                .iter()
                .find(|c| c.node_id == selection.node_id)
                .filter(|_| occupancy.is_free(selection.worker));
            let Some(chosen) = chosen else {
                let detail = format!(
                    "strategy {} picked worker {} outside the free pool or a node outside the ready set",
                    self.strategy.name(),
                    selection.worker
                );
                self.fault(Some(selection.node_id), detail);
                return;
            };
            // Budgets gate every strategy; an idle pool always admits one node.
            if occupancy.running > 0 && !occupancy.fits(chosen) {
                tracing::trace!(
                    run_id = %self.run_id,
                    node = %chosen.node_id,
                    memory_in_use = occupancy.memory_in_use,
                    rows_in_flight = occupancy.rows_in_flight,
                    "holding node until the budgets free up"
                );
                break;
            }
            self.start_node(selection);
            if self.halt.is_some() {
                return;
            }
        }
    }

    /// Ready nodes open for dispatch, in declaration order.
    fn candidates(&self) -> Vec<Candidate> {
        let barrier = if self.config.stage_barrier {
            self.state
                .nodes
                .iter()
                .filter(|(_, ns)| !ns.state.is_terminal())
                .filter_map(|(id, _)| self.plan.stage_of(*id))
                .min()
        } else {
            None
        };

        let mut candidates: Vec<Candidate> = self
            .ready
            .iter()
            .filter_map(|&id| {
                let node = self.workflow.node(id)?;
                let planned = self.plan.node(id)?;
                Some(Candidate {
                    node_id: id,
                    declaration_index: planned.declaration_index,
                    stage: planned.stage,
                    priority: node.hints.priority,
                    deadline: node.hints.deadline,
                    memory_estimate: node.hints.memory_estimate,
                    row_estimate: node.hints.row_estimate,
                    category: node.category,
                })
            })
            .filter(|c| barrier.is_none_or(|b| c.stage <= b))
            .collect();
        candidates.sort_by_key(|c| c.declaration_index);
        candidates
    }

    fn occupancy(&self) -> Occupancy {
        Occupancy {
            capacity: self.config.max_concurrency,
            free: (0..self.pool.busy.len())
                .filter(|&w| !self.pool.busy[w])
                .collect(),
            busy_time: self.pool.busy_time.clone(),
            running: self.in_flight.len(),
            memory_in_use: self.pool.memory_in_use,
            memory_budget: self.config.memory_budget,
            rows_in_flight: self.pool.rows_in_flight,
            row_budget: self.config.row_budget,
        }
    }

    fn start_node(&mut self, selection: Selection) {
        let Selection { node_id, worker } = selection;
        let workflow = Arc::clone(&self.workflow);
        let Some(node) = workflow.node(node_id) else {
            self.fault(Some(node_id), "selected node is not in the workflow");
            return;
        };
        let plugin = match self.registry.get(&node.type_tag) {
            Ok(plugin) => plugin,
            Err(e) => {
                self.fault(Some(node_id), e.to_string());
                return;
            }
        };
        let inputs = match self.flow.inputs_for(node_id) {
            Ok(inputs) => inputs,
            Err(e) => {
                self.fault(Some(node_id), e.to_string());
                return;
            }
        };
        if let Err(e) = self.state.transition_node(node_id, NodeState::Running) {
            self.fault(Some(node_id), e.to_string());
            return;
        }
        self.ready.retain(|&id| id != node_id);

        let policy =
            recovery::resolve_policy(node, plugin.descriptor(), &self.config.default_failure_policy)
                .clone();
        let memory_limit = node.memory_limit.or(self.config.node_memory_limit);
        let task = WorkerTask {
            run_id: self.run_id,
            node_id,
            idempotent: node.idempotent && plugin.descriptor().idempotent,
            plugin,
            policy,
            inputs,
            params: node.resolved_parameters(),
            timeout: node.timeout.or(self.config.default_timeout),
            memory_limit,
            limits: ResourceLimits {
                memory_bytes: memory_limit,
                max_output_bytes: self.config.max_output_bytes,
            },
            token: self.token.child_token(),
            progress: self.progress_tx.clone(),
        };

        let slot = Slot {
            node: node_id,
            worker,
            since: Instant::now(),
            memory: node.hints.memory_estimate,
            rows: node.hints.row_estimate,
        };
        self.pool.occupy(&slot);
        let handle = self.tasks.spawn(task.run());
        self.in_flight.insert(handle.id(), slot);
        self.peak_running = self.peak_running.max(self.in_flight.len());
        tracing::debug!(
            run_id = %self.run_id,
            node = %node_id,
            worker,
            strategy = self.strategy.name(),
            running = self.in_flight.len(),
            "node dispatched"
        );
    }

    // ── worker reports ─────────────────────────────────────────────────────

    fn on_progress(&mut self, progress: Progress) {
        match progress {
            Progress::AttemptStarted { node, attempt } => {
                let worker = self
                    .in_flight
                    .values()
                    .find(|s| s.node == node)
                    .map_or(0, |s| s.worker);
                if let Ok(ns) = self.state.node_mut(node) {
                    ns.attempts.push(NodeAttempt::new(attempt, worker));
                }
                self.events.emit(RunEvent::NodeStarted {
                    run_id: self.run_id,
                    node_id: node,
                    attempt,
                    worker,
                });
            }
            Progress::AttemptFailed {
                node,
                attempt,
                kind,
                message,
                delay,
            } => {
                self.fail_latest_attempt(node, &message);
                self.state.total_retries += 1;
                self.state.record_error(ErrorRecord::new(
                    node,
                    attempt,
                    kind,
                    message.clone(),
                    Consequence::Retried,
                ));
                tracing::debug!(
                    run_id = %self.run_id,
                    node = %node,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
                self.events.emit(RunEvent::NodeRetrying {
                    run_id: self.run_id,
                    node_id: node,
                    attempt,
                    kind,
                    error: message,
                });
            }
        }
    }

    fn on_joined(&mut self, joined: Result<(task::Id, Outcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                let slot = self.in_flight.remove(&e.id());
                if let Some(slot) = &slot {
                    self.pool.release(slot);
                }
                self.fault(slot.map(|s| s.node), format!("worker task failed: {e}"));
                return;
            }
        };
        let Some(slot) = self.in_flight.remove(&id) else {
            self.fault(None, "completion from an unknown worker task");
            return;
        };
        let duration = self.pool.release(&slot);

        let succeeded = matches!(outcome, Outcome::Succeeded { .. });
        match outcome {
            Outcome::Succeeded {
                completion,
                attempt,
            } => self.on_success(slot.node, completion, attempt, duration),
            Outcome::Failed {
                error,
                attempt,
                action,
            } => self.on_failure(slot.node, &error, attempt, action),
            Outcome::Interrupted { attempt } => self.on_interrupted(slot.node, attempt),
        }
        self.strategy.record(CompletionSample {
            duration,
            succeeded,
        });
    }

    fn on_success(&mut self, node: NodeId, completion: Completion, attempt: u32, held: Duration) {
        if let Ok(ns) = self.state.node_mut(node)
            && let Some(latest) = ns.attempts.last_mut()
        {
            latest.complete_success(completion.output_bytes);
        }
        if let Err(e) = self.state.transition_node(node, NodeState::Succeeded) {
            self.fault(Some(node), e.to_string());
            return;
        }
        self.state.total_output_bytes += completion.output_bytes;
        tracing::debug!(
            run_id = %self.run_id,
            node = %node,
            attempt,
            elapsed_ms = completion.elapsed.as_millis() as u64,
            output_bytes = completion.output_bytes,
            "node succeeded"
        );
        self.events.emit(RunEvent::NodeSucceeded {
            run_id: self.run_id,
            node_id: node,
            attempts: attempt,
            duration: held,
            output_bytes: completion.output_bytes,
        });

        if self.halt.is_some() {
            tracing::debug!(node = %node, "run halting, outputs discarded");
            return;
        }
        self.publish_outputs(node, completion.outputs.into_iter(), false);
    }

    fn on_failure(
        &mut self,
        node: NodeId,
        error: &InvocationError,
        attempt: u32,
        action: ExhaustedAction,
    ) {
        let message = error.to_string();
        let kind = error.kind();
        self.fail_latest_attempt(node, &message);
        if let Ok(ns) = self.state.node_mut(node) {
            ns.error_message = Some(message.clone());
        }
        if let Err(e) = self.state.transition_node(node, NodeState::Failed) {
            self.fault(Some(node), e.to_string());
            return;
        }

        let consequence = match action {
            ExhaustedAction::SkipDownstream => {
                let skipped = self.cascade(node);
                tracing::warn!(
                    run_id = %self.run_id,
                    node = %node,
                    attempt,
                    skipped = skipped.len(),
                    error = %message,
                    "node failed, skipping downstream"
                );
                self.state.record_error(
                    ErrorRecord::new(node, attempt, kind, message.clone(), Consequence::SkippedDownstream)
                        .with_skipped(skipped),
                );
                Consequence::SkippedDownstream
            }
            ExhaustedAction::AbortWorkflow => {
                tracing::error!(
                    run_id = %self.run_id,
                    node = %node,
                    attempt,
                    error = %message,
                    "node failed, aborting run"
                );
                self.state.record_error(ErrorRecord::new(
                    node,
                    attempt,
                    kind,
                    message.clone(),
                    Consequence::AbortedRun,
                ));
                self.abort(node);
                Consequence::AbortedRun
            }
            ExhaustedAction::ContinueWithDefault { outputs } => {
                tracing::warn!(
                    run_id = %self.run_id,
                    node = %node,
                    attempt,
                    error = %message,
                    "node failed, substituting default outputs"
                );
                self.state.record_error(ErrorRecord::new(
                    node,
                    attempt,
                    kind,
                    message.clone(),
                    Consequence::DefaultInjected,
                ));
                if self.halt.is_none() {
                    let defaults = outputs
                        .into_iter()
                        .map(|(port, value)| (port, Payload::inline(value)));
                    self.publish_outputs(node, defaults, true);
                }
                Consequence::DefaultInjected
            }
        };

        self.events.emit(RunEvent::NodeFailed {
            run_id: self.run_id,
            node_id: node,
            kind,
            error: message,
            consequence,
        });
    }

    fn on_interrupted(&mut self, node: NodeId, attempt: u32) {
        let reason = match self.halt {
            Some(Halt::Aborted { origin }) => SkipReason::Aborted { origin },
            _ => SkipReason::Cancelled,
        };
        self.fail_latest_attempt(node, "interrupted");
        self.state.record_error(ErrorRecord::new(
            node,
            attempt,
            ErrorKind::Cancelled,
            "interrupted by cancellation",
            Consequence::Interrupted,
        ));
        if let Err(e) = self.state.skip_node(node, reason) {
            self.fault(Some(node), e.to_string());
            return;
        }
        self.flow.mark_skipped(node);
        self.events.emit(RunEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: node,
            reason,
        });
        // A plugin cancelled itself while the run carries on.
        if self.halt.is_none() {
            let _ = self.cascade(node);
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Pause if self.halt.is_none() => {
                if self.state.transition_status(RunStatus::Paused).is_ok() {
                    tracing::info!(run_id = %self.run_id, running = self.in_flight.len(), "run paused");
                    self.events.emit(RunEvent::RunPaused {
                        run_id: self.run_id,
                    });
                }
            }
            Command::Resume if self.halt.is_none() => {
                if self.state.status == RunStatus::Paused
                    && self.state.transition_status(RunStatus::Running).is_ok()
                {
                    tracing::info!(run_id = %self.run_id, "run resumed");
                    self.events.emit(RunEvent::RunResumed {
                        run_id: self.run_id,
                    });
                }
            }
            Command::Cancel => self.cancel(),
            other => {
                tracing::debug!(run_id = %self.run_id, command = ?other, "command ignored while halting");
            }
        }
    }

    // ── data flow ──────────────────────────────────────────────────────────

    /// Publish `payloads` from `node`, wake consumers, and settle every
    /// connection whose source port produced nothing.
    fn publish_outputs(
        &mut self,
        node: NodeId,
        payloads: impl Iterator<Item = (String, Payload)>,
        substituted: bool,
    ) {
        let workflow = Arc::clone(&self.workflow);
        let Some(def) = workflow.node(node) else {
            self.fault(Some(node), "node vanished from the workflow");
            return;
        };

        let mut produced = HashSet::new();
        for (port, payload) in payloads {
            let Some(schema) = def.output(&port).map(|p| p.data_type) else {
                tracing::warn!(node = %node, port, "ignoring payload on undeclared port");
                continue;
            };
            let delivered = self
                .flow
                .publish(node, &port, payload, schema, substituted)
                .and_then(|packet| self.flow.deliver(&packet));
            match delivered {
                Ok(woken) => {
                    for id in woken {
                        self.mark_ready(id);
                    }
                }
                Err(e) => {
                    self.fault(Some(node), e.to_string());
                    return;
                }
            }
            produced.insert(port);
        }

        for connection in workflow.outgoing(node) {
            if produced.contains(&connection.from_port) {
                continue;
            }
            let optional = workflow
                .node(connection.to_node)
                .and_then(|n| n.input(&connection.to_port))
                .is_some_and(|p| !p.required);
            if optional {
                self.settle_absent(connection.to_node, &connection.to_port);
            } else if self.skip(connection.to_node, SkipReason::Upstream { origin: node }) {
                let _ = self.cascade_from(connection.to_node, node);
            }
        }
    }

    fn settle_absent(&mut self, consumer: NodeId, port: &str) {
        if self
            .state
            .node_state(consumer)
            .is_none_or(|s| s.is_terminal())
        {
            return;
        }
        match self.flow.deliver_absent(consumer, port) {
            Ok(Some(id)) => self.mark_ready(id),
            Ok(None) => {}
            Err(e) => self.fault(Some(consumer), e.to_string()),
        }
    }

    // ── skipping ───────────────────────────────────────────────────────────

    fn mark_ready(&mut self, node: NodeId) {
        if self.state.node_state(node) != Some(NodeState::Pending) {
            return;
        }
        if let Err(e) = self.state.transition_node(node, NodeState::Ready) {
            self.fault(Some(node), e.to_string());
            return;
        }
        self.ready.push(node);
        self.events.emit(RunEvent::NodeReady {
            run_id: self.run_id,
            node_id: node,
        });
    }

    /// Skip a Pending or Ready node. Returns `false` if it was already past
    /// that point.
    fn skip(&mut self, node: NodeId, reason: SkipReason) -> bool {
        if !matches!(
            self.state.node_state(node),
            Some(NodeState::Pending | NodeState::Ready)
        ) {
            return false;
        }
        if self.state.skip_node(node, reason).is_err() {
            return false;
        }
        self.flow.mark_skipped(node);
        self.ready.retain(|&id| id != node);
        tracing::debug!(run_id = %self.run_id, node = %node, reason = ?reason, "node skipped");
        self.events.emit(RunEvent::NodeSkipped {
            run_id: self.run_id,
            node_id: node,
            reason,
        });
        true
    }

    /// Skip everything downstream of `origin` over propagating connections,
    /// then settle tolerated connections out of the origin and the skipped
    /// nodes. Returns the nodes skipped here.
    fn cascade(&mut self, origin: NodeId) -> Vec<NodeId> {
        self.cascade_from(origin, origin)
    }

    /// [`cascade`](Self::cascade) below `from`, blaming `origin` for the
    /// skips.
    fn cascade_from(&mut self, from: NodeId, origin: NodeId) -> Vec<NodeId> {
        let plan = Arc::clone(&self.plan);
        let skipped: Vec<NodeId> = plan
            .dependents_of(from)
            .iter()
            .copied()
            .filter(|&d| self.skip(d, SkipReason::Upstream { origin }))
            .collect();

        let workflow = Arc::clone(&self.workflow);
        for source in std::iter::once(from).chain(skipped.iter().copied()) {
            for connection in workflow.outgoing(source) {
                if !workflow.propagates_failure(connection) {
                    self.settle_absent(connection.to_node, &connection.to_port);
                }
            }
        }
        skipped
    }

    fn skip_all_waiting(&mut self, reason: SkipReason) {
        let waiting: Vec<NodeId> = self
            .state
            .nodes
            .iter()
            .filter(|(_, ns)| matches!(ns.state, NodeState::Pending | NodeState::Ready))
            .map(|(id, _)| *id)
            .collect();
        for node in waiting {
            self.skip(node, reason);
        }
        self.ready.clear();
    }

    fn fail_latest_attempt(&mut self, node: NodeId, message: &str) {
        if let Ok(ns) = self.state.node_mut(node)
            && let Some(latest) = ns.attempts.last_mut()
            && latest.completed_at.is_none()
        {
            latest.complete_failure(message);
        }
    }

    // ── halting ────────────────────────────────────────────────────────────

    fn cancel(&mut self) {
        if self.halt.is_some() {
            return;
        }
        if let Err(e) = self.state.transition_status(RunStatus::Cancelling) {
            tracing::debug!(run_id = %self.run_id, error = %e, "cancel ignored");
            return;
        }
        self.halt = Some(Halt::Cancelled);
        self.token.cancel();
        tracing::info!(run_id = %self.run_id, running = self.in_flight.len(), "run cancelling");
        self.events.emit(RunEvent::RunCancelling {
            run_id: self.run_id,
        });
        self.skip_all_waiting(SkipReason::Cancelled);
    }

    fn abort(&mut self, origin: NodeId) {
        if self.halt.is_some() {
            return;
        }
        self.halt = Some(Halt::Aborted { origin });
        self.token.cancel();
        self.skip_all_waiting(SkipReason::Aborted { origin });
    }

    fn fault(&mut self, node: Option<NodeId>, detail: impl Into<String>) {
        let detail = detail.into();
        let attempts = node
            .and_then(|n| self.state.node(n))
            .map_or(0, |ns| ns.attempt_count());
        let fault = EngineFault {
            node,
            stage: node.and_then(|n| self.plan.stage_of(n)),
            attempts,
            detail,
        };
        tracing::error!(run_id = %self.run_id, fault = %fault, "engine fault");

        if let Some(n) = node {
            self.state.record_error(ErrorRecord::new(
                n,
                attempts,
                ErrorKind::EngineFault,
                fault.detail.clone(),
                Consequence::AbortedRun,
            ));
            if self.state.node_state(n) == Some(NodeState::Running) {
                if let Ok(ns) = self.state.node_mut(n) {
                    ns.error_message = Some(fault.detail.clone());
                }
                let _ = self.state.transition_node(n, NodeState::Failed);
            }
        }

        // A fault outranks any earlier halt.
        self.halt = Some(Halt::Faulted(fault));
        self.token.cancel();
        let reason = node.map_or(SkipReason::Cancelled, |origin| SkipReason::Aborted { origin });
        self.skip_all_waiting(reason);
    }

    // ── completion ─────────────────────────────────────────────────────────

    fn publish_status(&self) {
        self.status.send_replace(self.state.snapshot());
    }

    fn finish(mut self) -> RunReport {
        let status = match &self.halt {
            Some(Halt::Faulted(_)) => RunStatus::Failed,
            Some(Halt::Cancelled) => RunStatus::Cancelled,
            Some(Halt::Aborted { .. }) => RunStatus::Aborted,
            None if self.state.has_failures() => RunStatus::CompletedWithFailures,
            None => RunStatus::Completed,
        };
        if let Err(e) = self.state.transition_status(status) {
            tracing::error!(run_id = %self.run_id, error = %e, "forcing terminal status");
            self.state.status = status;
        }
        self.state.completed_at = Some(Utc::now());

        let duration = self.started.elapsed();
        let fault = match self.halt.take() {
            Some(Halt::Faulted(fault)) => Some(fault),
            _ => None,
        };
        let report = RunReport {
            run_id: self.run_id,
            workflow_id: self.workflow.id,
            status,
            strategy: self.config.strategy,
            stages: self.plan.stages.clone(),
            snapshot: self.state.snapshot(),
            packets: self.flow.packets().map(|p| p.as_ref().clone()).collect(),
            duration,
            started_at: self.started_at,
            peak_running: self.peak_running,
            fault,
        };

        tracing::info!(
            run_id = %self.run_id,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            retries = self.state.total_retries,
            errors = self.state.errors.len(),
            "run finished"
        );

        *self.report.lock() = Some(report.clone());
        self.publish_status();
        self.events.emit(RunEvent::RunFinished {
            run_id: self.run_id,
            status,
            duration,
        });
        report
    }
}
