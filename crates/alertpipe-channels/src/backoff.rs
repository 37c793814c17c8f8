// crates/alertpipe-channels/src/backoff.rs
// ============================================================================
// Module: Retry Backoff
// Description: Exponential backoff with jitter for the Dispatcher's
//              per-endpoint retry loop.
// Purpose: Bound how long a single endpoint send is retried before it is
//          counted as a definitive failure (§4.4, step 5): up to `attempts`
//          tries, waiting longer between each, capped so a flaky provider
//          never stalls a worker indefinitely.
// Dependencies: alertpipe-channels::sender, rand, tokio
// ============================================================================

use std::time::Duration;

use rand::Rng;

use crate::sender::SendOutcome;

/// Retry policy for one endpoint send.
///
/// # Invariants
/// - `base_delay` and `max_delay` bound every computed wait; jitter only
///   ever shortens a wait, never lengthens it past `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    /// Matches §4.4's documented default: base 1s, cap 30s, 3 attempts.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// The delay before retry number `attempt` (1-based: the wait before
    /// the second attempt is `delay_for(1)`), doubling each time up to
    /// `max_delay`, with up to 20% jitter subtracted.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = scaled.min(self.max_delay);
        let jitter_fraction = rand::thread_rng().gen_range(0.0..0.2);
        let jitter = capped.mul_f64(jitter_fraction);
        capped.saturating_sub(jitter)
    }
}

/// Runs `attempt` up to `policy.max_attempts` times, sleeping
/// [`BackoffPolicy::delay_for`] between tries, stopping as soon as the
/// outcome is [`SendOutcome::Sent`] or [`SendOutcome::PermanentFailure`].
/// A [`SendOutcome::RetryableFailure`] on the final attempt is returned
/// as-is; the caller (the Dispatcher) treats it as a definitive failure
/// for that endpoint without needing to inspect attempt counts itself.
pub async fn retry_with_backoff<F, Fut>(policy: BackoffPolicy, mut attempt: F) -> (SendOutcome, u32)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = SendOutcome>,
{
    let mut attempts_made = 0;
    loop {
        attempts_made += 1;
        let outcome = attempt().await;
        match outcome {
            SendOutcome::Sent | SendOutcome::PermanentFailure(_) => return (outcome, attempts_made),
            SendOutcome::RetryableFailure(_) if attempts_made >= policy.max_attempts => {
                return (outcome, attempts_made);
            }
            SendOutcome::RetryableFailure(_) => {
                tokio::time::sleep(policy.delay_for(attempts_made)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    #[test]
    fn delay_for_never_exceeds_max_delay() {
        let policy = BackoffPolicy::default();
        for attempt in 1..10 {
            assert!(policy.delay_for(attempt) <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_sent() {
        let calls = AtomicU32::new(0);
        let (outcome, attempts) = retry_with_backoff(BackoffPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { SendOutcome::Sent }
        })
        .await;
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_permanent_failure() {
        let (outcome, attempts) = retry_with_backoff(BackoffPolicy::default(), || async {
            SendOutcome::PermanentFailure("bad recipient".to_string())
        })
        .await;
        assert_eq!(outcome, SendOutcome::PermanentFailure("bad recipient".to_string()));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn retry_exhausts_max_attempts_on_persistent_retryable_failure() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let calls = AtomicU32::new(0);
        let (outcome, attempts) = retry_with_backoff(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { SendOutcome::RetryableFailure("429".to_string()) }
        })
        .await;
        assert_eq!(outcome, SendOutcome::RetryableFailure("429".to_string()));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
