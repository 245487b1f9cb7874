#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Strata Runtime
//!
//! The contract between the engine and node plugins.
//!
//! This crate provides:
//! - [`NodePlugin`] -- the one capability trait every processing unit implements
//! - [`PluginDescriptor`] -- static metadata: ports, parameters, default policy
//! - [`PluginRegistry`] -- immutable type-tag lookup built once at start-up
//! - [`invoke`] -- the execution boundary enforcing deadline, memory, and
//!   output ceilings
//! - [`MemoryMeter`] and [`ResourceLimits`] -- per-invocation accounting
//!
//! The boundary sits between the scheduler (which decides what runs) and the
//! plugin (which does the work). It never inspects payloads.

pub mod boundary;
pub mod error;
pub mod limits;
pub mod plugin;
pub mod registry;

pub use boundary::{Completion, invoke};
pub use error::{InvocationError, PluginError, RegistryError};
pub use limits::{LimitExceeded, MemoryMeter, Resource, ResourceLimits};
pub use plugin::{Invocation, NodeOutputs, NodePlugin, PluginDescriptor};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
