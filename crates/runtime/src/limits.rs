//! Resource ceilings and per-invocation memory accounting.
//!
//! Prevents one node from exhausting the process: plugins reserve working
//! memory against a [`MemoryMeter`] and the boundary checks output sizes
//! against [`ResourceLimits`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::plugin::NodeOutputs;

/// Which ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Working memory reserved through the meter.
    Memory,
    /// Total size of one node's outputs.
    Output,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A ceiling and the amount that would have exceeded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{resource} limit exceeded: {requested} bytes > {limit} bytes")]
pub struct LimitExceeded {
    /// The resource.
    pub resource: Resource,
    /// Configured ceiling in bytes.
    pub limit: u64,
    /// Bytes that were requested or produced.
    pub requested: u64,
}

/// Size ceilings applied to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling per invocation in bytes; `None` means unmetered.
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    /// Maximum total size of a single node's outputs in bytes (default: 10 MB).
    pub max_output_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: None,
            max_output_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl ResourceLimits {
    /// Override the memory ceiling.
    #[must_use]
    pub fn with_memory(mut self, bytes: Option<u64>) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Check the outputs of one invocation against the output ceiling.
    ///
    /// Returns `Ok(size)` if within limits.
    pub fn check_output_size(&self, outputs: &NodeOutputs) -> Result<u64, LimitExceeded> {
        let size = outputs.total_bytes();
        if size > self.max_output_bytes {
            Err(LimitExceeded {
                resource: Resource::Output,
                limit: self.max_output_bytes,
                requested: size,
            })
        } else {
            Ok(size)
        }
    }
}

#[derive(Debug, Default)]
struct MeterInner {
    limit: Option<u64>,
    in_use: AtomicU64,
    peak: AtomicU64,
    exceeded: AtomicBool,
}

/// Shared memory accounting for one invocation.
///
/// Cloning shares the counter, so a plugin can hand the meter to helper
/// tasks. Once a reservation is refused the meter stays marked exceeded and
/// the boundary reports the attempt as resource-exhausted.
#[derive(Debug, Clone, Default)]
pub struct MemoryMeter {
    inner: Arc<MeterInner>,
}

impl MemoryMeter {
    /// A meter with an optional ceiling in bytes.
    #[must_use]
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            inner: Arc::new(MeterInner {
                limit,
                ..MeterInner::default()
            }),
        }
    }

    /// A meter that never refuses.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Reserve `bytes` of working memory.
    pub fn reserve(&self, bytes: u64) -> Result<(), LimitExceeded> {
        let limit = self.inner.limit;
        let result = self
            .inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.saturating_add(bytes);
                match limit {
                    Some(max) if next > max => None,
                    _ => Some(next),
                }
            });
        match result {
            Ok(previous) => {
                self.inner
                    .peak
                    .fetch_max(previous.saturating_add(bytes), Ordering::AcqRel);
                Ok(())
            }
            Err(current) => {
                self.inner.exceeded.store(true, Ordering::Release);
                Err(LimitExceeded {
                    resource: Resource::Memory,
                    limit: limit.unwrap_or(u64::MAX),
                    requested: current.saturating_add(bytes),
                })
            }
        }
    }

    /// [`reserve`](Self::reserve) with the error mapped for plugin code using `?`.
    pub fn try_reserve(&self, bytes: u64) -> Result<(), PluginError> {
        self.reserve(bytes).map_err(PluginError::from)
    }

    /// Return `bytes` previously reserved.
    pub fn release(&self, bytes: u64) {
        let _ = self
            .inner
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Bytes currently reserved.
    #[must_use]
    pub fn in_use(&self) -> u64 {
        self.inner.in_use.load(Ordering::Acquire)
    }

    /// Highest reservation level seen.
    #[must_use]
    pub fn peak(&self) -> u64 {
        self.inner.peak.load(Ordering::Acquire)
    }

    /// Configured ceiling.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.inner.limit
    }

    /// Returns `true` once any reservation has been refused.
    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.inner.exceeded.load(Ordering::Acquire)
    }
}
