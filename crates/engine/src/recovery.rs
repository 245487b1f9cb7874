//! Error and recovery handling.
//!
//! Decides what happens after a failed attempt: retry with exponential
//! backoff, or apply the node's exhausted action. A timeout or exceeded
//! ceiling on a non-idempotent node aborts the run without retry.

use std::time::Duration;

use strata_runtime::{InvocationError, PluginDescriptor};
use strata_workflow::{ExhaustedAction, FailurePolicy, NodeDefinition, RetryConfig};
use tokio_util::sync::CancellationToken;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Wait, then try again.
    Retry {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// No more attempts; apply the action.
    Exhausted(ExhaustedAction),
    /// The attempt observed cancellation.
    Interrupted,
}

/// The policy that governs `node`: its own, else the plugin's default, else
/// the run's fallback.
#[must_use]
pub fn resolve_policy<'a>(
    node: &'a NodeDefinition,
    descriptor: &'a PluginDescriptor,
    fallback: &'a FailurePolicy,
) -> &'a FailurePolicy {
    node.failure_policy
        .as_ref()
        .or(descriptor.default_policy.as_ref())
        .unwrap_or(fallback)
}

/// Decide the follow-up to failed attempt number `attempt` (1-based).
#[must_use]
pub fn decide(
    policy: &FailurePolicy,
    error: &InvocationError,
    attempt: u32,
    idempotent: bool,
) -> Decision {
    if matches!(error, InvocationError::Cancelled) {
        return Decision::Interrupted;
    }
    if error.is_limit_violation() && !idempotent {
        return Decision::Exhausted(ExhaustedAction::AbortWorkflow);
    }
    if error.is_retryable() && attempt < policy.retry.attempts() {
        return Decision::Retry {
            delay: backoff(&policy.retry, attempt, error.backoff_hint()),
        };
    }
    Decision::Exhausted(policy.on_exhausted.clone())
}

/// Delay after failed attempt `attempt` (1-based): `initial × multiplier^(attempt-1)`,
/// capped, raised to the plugin's hint if longer, then jittered.
#[must_use]
pub fn backoff(retry: &RetryConfig, attempt: u32, hint: Option<Duration>) -> Duration {
    let base = retry.delay_for_attempt(attempt.saturating_sub(1));
    let base = hint.map_or(base, |h| h.max(base));
    jittered(base, retry.jitter)
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 || delay.is_zero() {
        return delay;
    }
    let jitter = jitter.min(1.0);
    let factor = 1.0 + jitter * rand::random::<f64>().mul_add(2.0, -1.0);
    delay.mul_f64(factor.max(0.0))
}

/// Sleep for `delay` unless `token` fires first. Returns `false` if cancelled.
pub async fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = token.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_core::{NodeId, TypeTag};
    use strata_runtime::{LimitExceeded, PluginError, Resource};

    fn retryable() -> InvocationError {
        InvocationError::Execution(PluginError::retryable("flaky"))
    }

    fn timeout() -> InvocationError {
        InvocationError::Timeout {
            elapsed: Duration::from_secs(1),
        }
    }

    fn exhausted() -> InvocationError {
        InvocationError::ResourceExhausted(LimitExceeded {
            resource: Resource::Memory,
            limit: 1,
            requested: 2,
        })
    }

    fn policy(attempts: u32) -> FailurePolicy {
        FailurePolicy::new(RetryConfig::exponential(attempts, 100, 1_000))
    }

    #[test]
    fn retries_until_ceiling_then_applies_action() {
        let p = policy(3);
        assert_eq!(
            decide(&p, &retryable(), 1, true),
            Decision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            decide(&p, &retryable(), 2, true),
            Decision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            decide(&p, &retryable(), 3, true),
            Decision::Exhausted(ExhaustedAction::SkipDownstream)
        );
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let p = policy(5).abort_workflow();
        let fatal = InvocationError::Execution(PluginError::fatal("bad input"));
        assert_eq!(
            decide(&p, &fatal, 1, true),
            Decision::Exhausted(ExhaustedAction::AbortWorkflow)
        );
    }

    #[test]
    fn limit_violation_on_non_idempotent_node_aborts() {
        let p = policy(5);
        for err in [timeout(), exhausted()] {
            assert_eq!(
                decide(&p, &err, 1, false),
                Decision::Exhausted(ExhaustedAction::AbortWorkflow)
            );
            assert!(matches!(decide(&p, &err, 1, true), Decision::Retry { .. }));
        }
    }

    #[test]
    fn cancellation_interrupts() {
        assert_eq!(
            decide(&policy(3), &InvocationError::Cancelled, 1, true),
            Decision::Interrupted
        );
    }

    #[test]
    fn default_outputs_are_carried() {
        let p = policy(1).continue_with_default([("out".to_owned(), json!(0))]);
        match decide(&p, &retryable(), 1, true) {
            Decision::Exhausted(ExhaustedAction::ContinueWithDefault { outputs }) => {
                assert_eq!(outputs["out"], json!(0));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn backoff_honours_cap_and_hint() {
        let retry = RetryConfig::exponential(10, 100, 400);
        assert_eq!(backoff(&retry, 5, None), Duration::from_millis(400));
        assert_eq!(
            backoff(&retry, 1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            backoff(&retry, 3, Some(Duration::from_millis(1))),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let retry = RetryConfig::fixed(3, 1_000).with_jitter(0.2);
        for _ in 0..200 {
            let d = backoff(&retry, 1, None);
            assert!(d >= Duration::from_millis(800), "{d:?}");
            assert!(d <= Duration::from_millis(1_200), "{d:?}");
        }
    }

    #[test]
    fn policy_resolution_order() {
        let tag = TypeTag::new("t").unwrap();
        let fallback = policy(2);
        let plugin_default = policy(4);
        let own = policy(6);

        let bare = PluginDescriptor::new(tag.clone(), "t");
        let with_default = bare.clone().with_default_policy(plugin_default.clone());
        let node = bare.instantiate(NodeId::v4(), "n");

        assert_eq!(resolve_policy(&node, &bare, &fallback), &fallback);
        assert_eq!(resolve_policy(&node, &with_default, &fallback), &plugin_default);
        let node = node.with_failure_policy(own.clone());
        assert_eq!(resolve_policy(&node, &with_default, &fallback), &own);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleep_is_interruptible() {
        let token = CancellationToken::new();
        assert!(sleep_unless_cancelled(Duration::from_millis(10), &token).await);

        let child = token.clone();
        let handle = tokio::spawn(async move {
            sleep_unless_cancelled(Duration::from_secs(3_600), &child).await
        });
        tokio::task::yield_now().await;
        token.cancel();
        assert!(!handle.await.unwrap());
    }
}
