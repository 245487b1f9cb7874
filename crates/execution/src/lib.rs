#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strata Execution
//!
//! Execution-time model for the Strata workflow engine.
//!
//! This crate models run-time concepts; it does NOT contain the scheduler.
//! It defines:
//!
//! - [`ExecutionPlan`]: Kahn stages, in-degrees, and cascade sets for one run
//! - [`RunStatus`]: run-level state machine
//! - [`RunState`] and [`NodeRunState`]: per-run and per-node bookkeeping
//! - [`StatusSnapshot`]: the structured view handed to callers
//! - [`DataFlowManager`]: append-only packet store with all-or-nothing readiness
//! - [`DataPacket`]: immutable payload plus [`Lineage`]
//! - [`ErrorRecord`]: one failed attempt and what it caused
//! - [`NodeAttempt`]: individual attempt tracking
//! - State machine transitions validated by the [`transition`] module

pub mod attempt;
pub mod error;
pub mod flow;
pub mod packet;
pub mod plan;
pub mod record;
pub mod state;
pub mod status;
pub mod transition;

pub use attempt::NodeAttempt;
pub use error::ExecutionError;
pub use flow::DataFlowManager;
pub use packet::{DataPacket, Lineage, Payload};
pub use plan::{ExecutionPlan, PlannedNode};
pub use record::{Consequence, ErrorKind, ErrorRecord};
pub use state::{NodeRunState, NodeStatus, RunState, SkipReason, StatusSnapshot};
pub use status::RunStatus;
