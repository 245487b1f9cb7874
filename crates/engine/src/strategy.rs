//! Dispatch strategies.
//!
//! A strategy picks which Ready node to start next and on which free worker.
//! It only ever sees Ready nodes; the scheduler rejects any selection outside
//! the candidate list or onto a busy worker.

use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_core::NodeId;
use strata_workflow::NodeCategory;

/// A Ready node offered to a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The node.
    pub node_id: NodeId,
    /// Position in the workflow's declaration order.
    pub declaration_index: usize,
    /// Plan stage.
    pub stage: usize,
    /// Scheduling weight; higher runs first.
    pub priority: i32,
    /// SLA measured from run start.
    pub deadline: Option<Duration>,
    /// Expected working memory in bytes.
    pub memory_estimate: u64,
    /// Expected row count.
    pub row_estimate: u64,
    /// Category for round-robin.
    pub category: NodeCategory,
}

/// Worker pool state at selection time.
#[derive(Debug, Clone, PartialEq)]
pub struct Occupancy {
    /// Concurrency ceiling.
    pub capacity: usize,
    /// Free worker slots, ascending.
    pub free: Vec<usize>,
    /// Accumulated busy time per worker slot.
    pub busy_time: Vec<Duration>,
    /// Nodes currently Running.
    pub running: usize,
    /// Memory estimates of running nodes, summed.
    pub memory_in_use: u64,
    /// Shared memory budget.
    pub memory_budget: Option<u64>,
    /// Row estimates of running nodes, summed.
    pub rows_in_flight: u64,
    /// Shared row budget.
    pub row_budget: Option<u64>,
}

impl Occupancy {
    /// An idle pool of `capacity` workers with no budgets.
    #[must_use]
    pub fn idle(capacity: usize) -> Self {
        Self {
            capacity,
            free: (0..capacity).collect(),
            busy_time: vec![Duration::ZERO; capacity],
            running: 0,
            memory_in_use: 0,
            memory_budget: None,
            rows_in_flight: 0,
            row_budget: None,
        }
    }

    /// Lowest-numbered free worker.
    #[must_use]
    pub fn first_free(&self) -> Option<usize> {
        self.free.first().copied()
    }

    /// Free worker with the least accumulated busy time; ties go to the
    /// lowest slot.
    #[must_use]
    pub fn least_loaded_free(&self) -> Option<usize> {
        self.free
            .iter()
            .copied()
            .min_by_key(|&w| (self.busy_time.get(w).copied().unwrap_or_default(), w))
    }

    /// Returns `true` if `worker` is free.
    #[must_use]
    pub fn is_free(&self, worker: usize) -> bool {
        self.free.contains(&worker)
    }

    /// Returns `true` if `candidate`'s estimates fit the remaining budgets.
    #[must_use]
    pub fn fits(&self, candidate: &Candidate) -> bool {
        let fits = |budget: Option<u64>, used: u64, wanted: u64| {
            budget.is_none_or(|b| used.saturating_add(wanted) <= b)
        };
        fits(self.memory_budget, self.memory_in_use, candidate.memory_estimate)
            && fits(self.row_budget, self.rows_in_flight, candidate.row_estimate)
    }

    /// Fraction of the memory budget in use, if a budget is set.
    #[must_use]
    pub fn memory_utilisation(&self) -> Option<f64> {
        self.memory_budget
            .filter(|&b| b > 0)
            .map(|b| self.memory_in_use as f64 / b as f64)
    }
}

/// Which node to start and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// The node.
    pub node_id: NodeId,
    /// The worker slot.
    pub worker: usize,
}

/// A finished node, fed back to strategies that adapt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSample {
    /// Time the worker slot was occupied.
    pub duration: Duration,
    /// `true` if the node ended Succeeded.
    pub succeeded: bool,
}

/// Chooses the next node to dispatch.
pub trait SchedulingStrategy: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Pick one candidate and a free worker. `candidates` is non-empty and
    /// sorted by declaration order. `None` holds dispatch back.
    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection>;

    /// Observe a finished node.
    fn record(&mut self, _sample: CompletionSample) {}
}

/// Selectable strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Declaration order.
    #[default]
    Fifo,
    /// Highest weight first.
    Priority,
    /// First node that fits the memory and row budgets.
    ResourceAware,
    /// Declaration order onto the least-busy worker.
    LoadBalanced,
    /// Earliest deadline first.
    DeadlineAware,
    /// Cycle through node categories.
    RoundRobin,
    /// Switch between the others based on recent completions.
    Adaptive,
}

impl StrategyKind {
    /// Every strategy, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Fifo,
        Self::Priority,
        Self::ResourceAware,
        Self::LoadBalanced,
        Self::DeadlineAware,
        Self::RoundRobin,
        Self::Adaptive,
    ];

    /// Create a fresh strategy instance for one run.
    #[must_use]
    pub fn build(self) -> Box<dyn SchedulingStrategy> {
        match self {
            Self::Fifo => Box::new(Fifo),
            Self::Priority => Box::new(Priority),
            Self::ResourceAware => Box::new(ResourceAware),
            Self::LoadBalanced => Box::new(LoadBalanced),
            Self::DeadlineAware => Box::new(DeadlineAware),
            Self::RoundRobin => Box::new(RoundRobin::default()),
            Self::Adaptive => Box::new(Adaptive::default()),
        }
    }

    /// Config and CLI spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Priority => "priority",
            Self::ResourceAware => "resource_aware",
            Self::LoadBalanced => "load_balanced",
            Self::DeadlineAware => "deadline_aware",
            Self::RoundRobin => "round_robin",
            Self::Adaptive => "adaptive",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy `{0}`")]
pub struct UnknownStrategy(pub String);

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| UnknownStrategy(s.to_owned()))
    }
}

fn on_first_free(candidate: &Candidate, occupancy: &Occupancy) -> Option<Selection> {
    Some(Selection {
        node_id: candidate.node_id,
        worker: occupancy.first_free()?,
    })
}

/// Declaration order.
#[derive(Debug, Default)]
pub struct Fifo;

impl SchedulingStrategy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        on_first_free(candidates.first()?, occupancy)
    }
}

/// Highest priority first, ties by declaration order.
#[derive(Debug, Default)]
pub struct Priority;

impl SchedulingStrategy for Priority {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        let best = candidates
            .iter()
            .min_by_key(|c| (std::cmp::Reverse(c.priority), c.declaration_index))?;
        on_first_free(best, occupancy)
    }
}

/// First candidate whose memory and row estimates fit the remaining budgets.
///
/// With nothing running and nothing fitting, the smallest candidate is
/// started anyway so the run cannot stall on an oversized node.
#[derive(Debug, Default)]
pub struct ResourceAware;

impl SchedulingStrategy for ResourceAware {
    fn name(&self) -> &'static str {
        "resource_aware"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        if let Some(fit) = candidates.iter().find(|c| occupancy.fits(c)) {
            return on_first_free(fit, occupancy);
        }
        if occupancy.running > 0 {
            return None;
        }
        let smallest = candidates
            .iter()
            .min_by_key(|c| (c.memory_estimate, c.row_estimate, c.declaration_index))?;
        on_first_free(smallest, occupancy)
    }
}

/// Declaration order onto the free worker with the least busy time.
#[derive(Debug, Default)]
pub struct LoadBalanced;

impl SchedulingStrategy for LoadBalanced {
    fn name(&self) -> &'static str {
        "load_balanced"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        Some(Selection {
            node_id: candidates.first()?.node_id,
            worker: occupancy.least_loaded_free()?,
        })
    }
}

/// Earliest deadline first; nodes without a deadline follow in declaration order.
#[derive(Debug, Default)]
pub struct DeadlineAware;

impl SchedulingStrategy for DeadlineAware {
    fn name(&self) -> &'static str {
        "deadline_aware"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        let best = candidates
            .iter()
            .filter(|c| c.deadline.is_some())
            .min_by_key(|c| (c.deadline, c.declaration_index))
            .or_else(|| candidates.first())?;
        on_first_free(best, occupancy)
    }
}

/// Cycles through node categories in the order they were first seen.
#[derive(Debug, Default)]
pub struct RoundRobin {
    order: Vec<NodeCategory>,
    cursor: usize,
}

impl SchedulingStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        for c in candidates {
            if !self.order.contains(&c.category) {
                self.order.push(c.category);
            }
        }
        let n = self.order.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let category = self.order[idx];
            if let Some(c) = candidates.iter().find(|c| c.category == category) {
                let selection = on_first_free(c, occupancy)?;
                self.cursor = (idx + 1) % n;
                return Some(selection);
            }
        }
        None
    }
}

/// Completions kept in the sliding window.
pub const ADAPTIVE_WINDOW: usize = 8;
/// Samples required before failure rate and memory pressure are considered.
pub const ADAPTIVE_MIN_SAMPLES: usize = 4;
/// Failure rate at or above which the adaptive strategy turns resource-aware.
pub const ADAPTIVE_FAILURE_RATE: f64 = 0.25;
/// Memory utilisation at or above which the adaptive strategy turns resource-aware.
pub const ADAPTIVE_MEMORY_UTILISATION: f64 = 0.75;
/// Slowdown against the first full window that triggers load balancing.
pub const ADAPTIVE_SLOWDOWN: f64 = 2.0;

/// Picks a concrete strategy per selection from recent completions.
///
/// In order: with at least [`ADAPTIVE_MIN_SAMPLES`] samples, a failure rate
/// of [`ADAPTIVE_FAILURE_RATE`] or memory utilisation of
/// [`ADAPTIVE_MEMORY_UTILISATION`] selects resource-aware; a ready node with
/// a deadline selects deadline-aware; a window mean duration more than
/// [`ADAPTIVE_SLOWDOWN`] times the first full window's mean selects
/// load-balanced; otherwise FIFO.
#[derive(Debug, Default)]
pub struct Adaptive {
    window: VecDeque<CompletionSample>,
    baseline: Option<Duration>,
    mode: Option<StrategyKind>,
}

impl Adaptive {
    /// Strategy used by the most recent selection.
    #[must_use]
    pub fn current_mode(&self) -> StrategyKind {
        self.mode.unwrap_or(StrategyKind::Fifo)
    }

    fn mean_duration(&self) -> Option<Duration> {
        let n = u32::try_from(self.window.len()).ok().filter(|&n| n > 0)?;
        Some(self.window.iter().map(|s| s.duration).sum::<Duration>() / n)
    }

    fn choose(&self, candidates: &[Candidate], occupancy: &Occupancy) -> StrategyKind {
        if self.window.len() >= ADAPTIVE_MIN_SAMPLES {
            let failures = self.window.iter().filter(|s| !s.succeeded).count();
            let failure_rate = failures as f64 / self.window.len() as f64;
            let memory_pressure = occupancy
                .memory_utilisation()
                .is_some_and(|u| u >= ADAPTIVE_MEMORY_UTILISATION);
            if failure_rate >= ADAPTIVE_FAILURE_RATE || memory_pressure {
                return StrategyKind::ResourceAware;
            }
        }
        if candidates.iter().any(|c| c.deadline.is_some()) {
            return StrategyKind::DeadlineAware;
        }
        if let (Some(baseline), Some(mean)) = (self.baseline, self.mean_duration())
            && mean.as_secs_f64() > baseline.as_secs_f64() * ADAPTIVE_SLOWDOWN
        {
            return StrategyKind::LoadBalanced;
        }
        StrategyKind::Fifo
    }
}

impl SchedulingStrategy for Adaptive {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn select(&mut self, candidates: &[Candidate], occupancy: &Occupancy) -> Option<Selection> {
        let mode = self.choose(candidates, occupancy);
        if self.mode != Some(mode) {
            tracing::debug!(from = ?self.mode, to = %mode, "adaptive strategy switched");
            self.mode = Some(mode);
        }
        match mode {
            StrategyKind::ResourceAware => ResourceAware.select(candidates, occupancy),
            StrategyKind::DeadlineAware => DeadlineAware.select(candidates, occupancy),
            StrategyKind::LoadBalanced => LoadBalanced.select(candidates, occupancy),
            _ => Fifo.select(candidates, occupancy),
        }
    }

    fn record(&mut self, sample: CompletionSample) {
        if self.window.len() == ADAPTIVE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        if self.baseline.is_none() && self.window.len() == ADAPTIVE_WINDOW {
            self.baseline = self.mean_duration();
        }
    }
}
