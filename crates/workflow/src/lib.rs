#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strata Workflow
//!
//! Graph model and validation for the Strata workflow engine.
//!
//! A workflow is a directed acyclic graph of typed processing nodes whose
//! ports are wired together by connections. This crate provides:
//!
//! - [`WorkflowDefinition`], the graph snapshot handed to the engine
//! - [`NodeDefinition`] with its [`PortSchema`]s, [`ParameterSpec`]s and
//!   [`SchedulingHints`]
//! - [`Connection`] and [`EdgeFailurePolicy`] for port-to-port edges
//! - [`FailurePolicy`] and [`RetryConfig`] for per-node recovery settings
//! - [`DependencyGraph`] (a `petgraph` wrapper) for topological sorting,
//!   stage computation and cascade queries
//! - [`validate_workflow`] (fail-fast) and [`collect_validation_errors`]
//! - [`WorkflowBuilder`] for fluent, validated construction
//! - [`NodeState`] for tracking per-node progress in a run

pub mod builder;
pub mod connection;
pub mod definition;
pub mod error;
pub mod graph;
pub mod node;
pub mod parameter;
pub mod policy;
pub mod port;
pub mod state;
pub mod validate;

pub use builder::WorkflowBuilder;
pub use connection::{Connection, EdgeFailurePolicy};
pub use definition::WorkflowDefinition;
pub use error::{PortDirection, ValidationError};
pub use graph::DependencyGraph;
pub use node::{NodeCategory, NodeDefinition, SchedulingHints};
pub use parameter::{ParameterIssue, ParameterKind, ParameterRules, ParameterSpec};
pub use policy::{ExhaustedAction, FailurePolicy, RetryConfig};
pub use port::{DataType, PortSchema};
pub use state::NodeState;
pub use validate::{collect_validation_errors, validate_workflow};

/// Serde helper for `Option<Duration>` serialized as milliseconds.
pub mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serialize an `Option<Duration>` as an optional integer of milliseconds.
    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(s),
            None => s.serialize_none(),
        }
    }

    /// Deserialize an optional integer of milliseconds into `Option<Duration>`.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let opt: Option<u64> = Option::deserialize(d)?;
        Ok(opt.map(Duration::from_millis))
    }
}
