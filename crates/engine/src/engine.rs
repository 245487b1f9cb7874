//! The engine control API.
//!
//! Submits workflows and steers their runs:
//!
//! 1. Validate the run config and the workflow graph
//! 2. Resolve every enabled node against the plugin registry and check the
//!    graph against the contracts the plugins declare
//! 3. Build the execution plan
//! 4. Admit the run under the active run limit
//! 5. Spawn one dispatch loop per run on the current Tokio runtime
//!
//! After submission all control is by [`RunId`]. Commands are queued to the
//! run's loop, status is read from its latest published snapshot, and the
//! final [`RunReport`] is kept until the run is forgotten.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use strata_core::{NodeId, RunId, WorkflowId};
use strata_execution::{ExecutionPlan, RunState, StatusSnapshot};
use strata_runtime::PluginRegistry;
use strata_workflow::{WorkflowDefinition, validate_workflow};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::config::{EngineConfig, RunConfig};
use crate::error::EngineError;
use crate::events::{EventBus, EventSubscriber};
use crate::report::RunReport;
use crate::scheduler::{Command, RunSetup, Scheduler};

/// Control surface of one submitted run.
struct RunHandle {
    workflow_id: WorkflowId,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<StatusSnapshot>,
    /// The dispatch loop holds the only strong reference.
    events: Weak<EventBus>,
    report: Arc<Mutex<Option<RunReport>>>,
}

impl RunHandle {
    fn is_terminal(&self) -> bool {
        self.status.borrow().status.is_terminal()
    }
}

/// The workflow execution engine.
///
/// Cheap to clone; clones share the registry and the run table.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<PluginRegistry>,
    config: EngineConfig,
    runs: Arc<DashMap<RunId, RunHandle>>,
    /// Held from the active run count to the insert.
    admission: Arc<Mutex<()>>,
}

impl Engine {
    /// Create an engine with the default config.
    #[must_use]
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config: EngineConfig::default(),
            runs: Arc::new(DashMap::new()),
            admission: Arc::default(),
        }
    }

    /// Create an engine with an explicit config.
    pub fn with_config(
        registry: Arc<PluginRegistry>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            runs: Arc::new(DashMap::new()),
            admission: Arc::default(),
        })
    }

    /// The plugin registry.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// The engine config.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate, plan, and start `workflow`. Returns once the run is
    /// scheduled; the run proceeds on the current Tokio runtime.
    pub fn submit(
        &self,
        workflow: WorkflowDefinition,
        config: RunConfig,
    ) -> Result<RunId, EngineError> {
        self.launch(workflow, config).map(|(run_id, _)| run_id)
    }

    /// [`submit`](Self::submit) with the engine's default run config.
    pub fn submit_default(&self, workflow: WorkflowDefinition) -> Result<RunId, EngineError> {
        self.submit(workflow, self.config.run.clone())
    }

    /// Submit and subscribe before the first event is emitted.
    pub fn submit_and_subscribe(
        &self,
        workflow: WorkflowDefinition,
        config: RunConfig,
    ) -> Result<(RunId, EventSubscriber), EngineError> {
        self.launch(workflow, config)
    }

    fn launch(
        &self,
        workflow: WorkflowDefinition,
        config: RunConfig,
    ) -> Result<(RunId, EventSubscriber), EngineError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        config.validate()?;

        validate_workflow(&workflow)?;
        for node in workflow.nodes.iter().filter(|n| n.enabled) {
            self.registry.resolve(node)?;
        }
        self.registry.check_contracts(&workflow)?;

        let run_id = RunId::v4();
        let plan = ExecutionPlan::from_workflow(run_id, &workflow)?;
        let order: Vec<NodeId> = plan.nodes.keys().copied().collect();
        let initial = RunState::new(run_id, workflow.id, &order).snapshot();

        let events = Arc::new(EventBus::new(config.event_capacity));
        let subscriber = events.subscribe();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(initial);
        let report = Arc::new(Mutex::new(None));

        {
            let _admission = self.admission.lock();
            if let Some(limit) = self.config.max_active_runs
                && self.active_runs() >= limit
            {
                return Err(EngineError::TooManyRuns { limit });
            }
            self.runs.insert(
                run_id,
                RunHandle {
                    workflow_id: workflow.id,
                    commands: command_tx,
                    status: status_rx,
                    events: Arc::downgrade(&events),
                    report: Arc::clone(&report),
                },
            );
        }

        tracing::info!(
            run_id = %run_id,
            workflow = %workflow.name,
            nodes = workflow.nodes.len(),
            stages = plan.stages.len(),
            "run submitted"
        );

        let span = tracing::info_span!("run", run_id = %run_id, workflow_id = %workflow.id);
        let scheduler = Scheduler::new(RunSetup {
            run_id,
            workflow: Arc::new(workflow),
            plan: Arc::new(plan),
            registry: Arc::clone(&self.registry),
            config,
            commands: command_rx,
            status: status_tx,
            events,
            report,
        });
        runtime.spawn(
            async move {
                scheduler.run().await;
            }
            .instrument(span),
        );

        Ok((run_id, subscriber))
    }

    /// Stop dispatching new nodes. Running nodes continue.
    pub fn pause(&self, run_id: RunId) -> Result<(), EngineError> {
        self.command(run_id, Command::Pause)
    }

    /// Resume dispatch after [`pause`](Self::pause).
    pub fn resume(&self, run_id: RunId) -> Result<(), EngineError> {
        self.command(run_id, Command::Resume)
    }

    /// Cancel the run. Waiting nodes are skipped and running nodes are
    /// signalled to stop.
    pub fn cancel(&self, run_id: RunId) -> Result<(), EngineError> {
        self.command(run_id, Command::Cancel)
    }

    fn command(&self, run_id: RunId, command: Command) -> Result<(), EngineError> {
        let handle = self.handle(run_id)?;
        if handle.is_terminal() {
            return Err(EngineError::RunFinished(run_id));
        }
        handle
            .commands
            .send(command)
            .map_err(|_| EngineError::RunFinished(run_id))
    }

    /// The latest status snapshot of a run.
    pub fn query_status(&self, run_id: RunId) -> Result<StatusSnapshot, EngineError> {
        Ok(self.handle(run_id)?.status.borrow().clone())
    }

    /// Subscribe to a running run's events from now on.
    pub fn subscribe(&self, run_id: RunId) -> Result<EventSubscriber, EngineError> {
        self.handle(run_id)?
            .events
            .upgrade()
            .map(|bus| bus.subscribe())
            .ok_or(EngineError::RunFinished(run_id))
    }

    /// Wait for a run to finish and return its report.
    pub async fn wait(&self, run_id: RunId) -> Result<RunReport, EngineError> {
        let (mut status, report) = {
            let handle = self.handle(run_id)?;
            (handle.status.clone(), Arc::clone(&handle.report))
        };
        // A closed channel still holds the last snapshot; the report slot decides.
        let _ = status.wait_for(|s| s.status.is_terminal()).await;
        report.lock().clone().ok_or(EngineError::RunLost(run_id))
    }

    /// The report of a finished run, if it has finished.
    pub fn report(&self, run_id: RunId) -> Result<Option<RunReport>, EngineError> {
        Ok(self.handle(run_id)?.report.lock().clone())
    }

    /// Drop a finished run from the run table, returning its report.
    pub fn forget(&self, run_id: RunId) -> Result<Option<RunReport>, EngineError> {
        let finished = self.handle(run_id)?.is_terminal();
        if !finished {
            return Err(EngineError::RunActive(run_id));
        }
        Ok(self
            .runs
            .remove(&run_id)
            .and_then(|(_, handle)| handle.report.lock().take()))
    }

    /// Number of runs not yet terminal.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.runs.iter().filter(|r| !r.is_terminal()).count()
    }

    /// Every known run and its workflow.
    #[must_use]
    pub fn runs(&self) -> Vec<(RunId, WorkflowId)> {
        self.runs
            .iter()
            .map(|r| (*r.key(), r.value().workflow_id))
            .collect()
    }

    fn handle(
        &self,
        run_id: RunId,
    ) -> Result<dashmap::mapref::one::Ref<'_, RunId, RunHandle>, EngineError> {
        self.runs.get(&run_id).ok_or(EngineError::UnknownRun(run_id))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("plugins", &self.registry.len())
            .field("runs", &self.runs.len())
            .field("config", &self.config)
            .finish()
    }
}
