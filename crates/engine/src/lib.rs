//! # Strata Engine
//!
//! Runs validated workflows to completion.
//!
//! - [`Engine`]: submission and run control by [`RunId`](strata_core::RunId)
//! - [`RunConfig`]: per-run concurrency, budgets, timeouts, and strategy
//! - [`SchedulingStrategy`]: pluggable choice of the next node and worker
//! - [`RunEvent`] / [`EventSubscriber`]: live progress of one run
//! - [`RunReport`]: final status, error log, and published packets
//!
//! Each run is driven by a single dispatch loop that owns the run state.
//! Nodes execute on a fixed pool of worker slots; failed attempts are
//! retried with backoff before the node's exhausted action applies.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod recovery;
pub mod report;
mod scheduler;
pub mod strategy;
mod worker;

pub use config::{ConfigError, EngineConfig, RunConfig};
pub use engine::Engine;
pub use error::{EngineError, EngineFault};
pub use events::{EventBus, EventSubscriber, RunEvent};
pub use recovery::Decision;
pub use report::RunReport;
pub use strategy::{
    Candidate, CompletionSample, Occupancy, SchedulingStrategy, Selection, StrategyKind,
    UnknownStrategy,
};
