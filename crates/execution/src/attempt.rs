//! Node execution attempt tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single attempt to execute a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttempt {
    /// Which attempt this is (1-indexed).
    pub attempt_number: u32,
    /// Worker slot that ran the attempt.
    pub worker: usize,
    /// When this attempt started.
    pub started_at: DateTime<Utc>,
    /// When this attempt completed (if finished).
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the attempt failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Total size of the published outputs in bytes.
    #[serde(default)]
    pub output_bytes: u64,
}

impl NodeAttempt {
    /// Create a new attempt that has just started.
    #[must_use]
    pub fn new(attempt_number: u32, worker: usize) -> Self {
        Self {
            attempt_number,
            worker,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            output_bytes: 0,
        }
    }

    /// Mark this attempt as successfully completed.
    pub fn complete_success(&mut self, output_bytes: u64) {
        self.completed_at = Some(Utc::now());
        self.output_bytes = output_bytes;
    }

    /// Mark this attempt as failed.
    pub fn complete_failure(&mut self, error: impl Into<String>) {
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Returns `true` if this attempt has finished (success or failure).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Returns `true` if this attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.is_complete() && self.error.is_none()
    }

    /// Returns `true` if this attempt failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Calculate the duration of this attempt.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .map(|end| (end - self.started_at).to_std().unwrap_or(Duration::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_attempt_is_open() {
        let attempt = NodeAttempt::new(1, 0);
        assert_eq!(attempt.attempt_number, 1);
        assert!(!attempt.is_complete());
        assert!(!attempt.is_success());
        assert!(!attempt.is_failure());
        assert!(attempt.duration().is_none());
    }

    #[test]
    fn success_records_bytes() {
        let mut attempt = NodeAttempt::new(1, 3);
        attempt.complete_success(512);
        assert!(attempt.is_success());
        assert_eq!(attempt.output_bytes, 512);
        assert_eq!(attempt.worker, 3);
        assert!(attempt.duration().is_some());
    }

    #[test]
    fn failure_records_message() {
        let mut attempt = NodeAttempt::new(2, 0);
        attempt.complete_failure("connection reset");
        assert!(attempt.is_failure());
        assert!(!attempt.is_success());
        assert_eq!(attempt.error.as_deref(), Some("connection reset"));
    }
}
