//! The node execution boundary.
//!
//! [`invoke`] runs one plugin attempt and turns everything that can go wrong
//! at the boundary into an [`InvocationError`]:
//!
//! 1. Refuse to start if the token is already cancelled
//! 2. Race the plugin against the wall-clock deadline
//! 3. Map a refused memory reservation to `ResourceExhausted`, even if the
//!    plugin swallowed the error
//! 4. Check the produced ports against the descriptor
//! 5. Enforce the output-size ceiling
//!
//! Payloads pass through untouched.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::InvocationError;
use crate::limits::{LimitExceeded, Resource, ResourceLimits};
use crate::plugin::{Invocation, NodeOutputs, NodePlugin};

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The produced payloads.
    pub outputs: NodeOutputs,
    /// Total output size in bytes.
    pub output_bytes: u64,
    /// Wall-clock time spent in the plugin.
    pub elapsed: Duration,
    /// Highest memory reservation during the attempt.
    pub peak_memory: u64,
}

/// Run one attempt of `plugin` under `limits`.
///
/// On timeout the attempt's token is cancelled so any work the plugin spawned
/// can observe it.
pub async fn invoke(
    plugin: &dyn NodePlugin,
    invocation: Invocation,
    limits: &ResourceLimits,
) -> Result<Completion, InvocationError> {
    if invocation.token.is_cancelled() {
        return Err(InvocationError::Cancelled);
    }

    let token = invocation.token.clone();
    let meter = invocation.memory.clone();
    let deadline = invocation.deadline;
    let node_id = invocation.node_id;
    let attempt = invocation.attempt;
    let started = Instant::now();

    tracing::trace!(node = %node_id, attempt, ?deadline, "invoking plugin");

    let result = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, plugin.execute(invocation)).await
        {
            Ok(result) => result,
            Err(_) => {
                token.cancel();
                let elapsed = started.elapsed();
                tracing::debug!(node = %node_id, attempt, ?elapsed, "plugin deadline exceeded");
                return Err(InvocationError::Timeout { elapsed });
            }
        },
        None => plugin.execute(invocation).await,
    };
    let elapsed = started.elapsed();

    if meter.exceeded() {
        return Err(InvocationError::ResourceExhausted(LimitExceeded {
            resource: Resource::Memory,
            limit: meter.limit().unwrap_or(u64::MAX),
            requested: meter.peak().max(meter.in_use()),
        }));
    }

    let outputs = result.map_err(InvocationError::from)?;
    check_ports(plugin, &outputs)?;
    let output_bytes = limits
        .check_output_size(&outputs)
        .map_err(InvocationError::ResourceExhausted)?;

    Ok(Completion {
        outputs,
        output_bytes,
        elapsed,
        peak_memory: meter.peak(),
    })
}

fn check_ports(plugin: &dyn NodePlugin, outputs: &NodeOutputs) -> Result<(), InvocationError> {
    let declared = &plugin.descriptor().outputs;
    let missing: Vec<String> = declared
        .iter()
        .filter(|p| p.required && outputs.get(&p.name).is_none())
        .map(|p| p.name.clone())
        .collect();
    let undeclared: Vec<String> = outputs
        .port_names()
        .filter(|name| !declared.iter().any(|p| p.name == *name))
        .map(str::to_owned)
        .collect();
    if missing.is_empty() && undeclared.is_empty() {
        Ok(())
    } else {
        Err(InvocationError::OutputMismatch {
            missing,
            undeclared,
        })
    }
}
