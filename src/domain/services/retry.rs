//! Retry executor (C2): drives a fallible async operation under a
//! `RetryPolicy` until it succeeds or the stop condition fires (spec §4.2).

use std::future::Future;
use std::time::{Duration, Instant};

use crate::domain::models::retry_policy::RetryPolicy;
use crate::error::{DownloadError, Result};

/// Statistics surfaced to the caller after a retry loop finishes, mirroring
/// tenacity's `RetryCallState` enough to support scenario 2 (§8): asserting
/// `attempt_number` on exhaustion.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryStats {
    pub attempt_number: u32,
}

/// Runs `op` until it returns `Ok`, the policy's stop condition fires, or a
/// non-retriable error is returned. `events` resolves named
/// `stop_when_event_set` flags (e.g. a cooperative cancel signal); pass
/// `|_| false` when none apply.
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    events: &dyn Fn(&str) -> bool,
    mut op: F,
) -> (Result<T>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = op(attempt).await;

        match &result {
            Ok(_) => return (result, RetryStats { attempt_number: attempt }),
            Err(e) if !e.is_retriable() => return (result, RetryStats { attempt_number: attempt }),
            Err(_) => {}
        }

        let elapsed = start.elapsed();
        if policy.stop.should_stop(attempt, elapsed, events) {
            return (result, RetryStats { attempt_number: attempt });
        }

        let wait = policy.wait.next_wait(attempt, &rand01);
        if wait > Duration::ZERO {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Decides whether a retriable per-file error should be retried: `None`
/// means the policy's stop condition has fired, `Some(wait)` is the delay
/// before the next attempt. Used by downloaders whose transfer loop holds a
/// persistent connection and so can't go through `run_with_retry`'s
/// closure-based `FnMut` (the connection handle can't be safely re-borrowed
/// across retried futures), but still needs the same stop/wait evaluation.
pub fn next_retry_wait(policy: &RetryPolicy, attempt: u32, start: Instant) -> Option<Duration> {
    if policy.stop.should_stop(attempt, start.elapsed(), &|_| false) {
        return None;
    }
    Some(policy.wait.next_wait(attempt, &rand01))
}

fn rand01() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1_000_000) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::retry_policy::{StopCondition, WaitPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_after_configured_attempts() {
        let policy = RetryPolicy {
            stop: StopCondition::AfterAttempt(5),
            wait: WaitPolicy::None,
        };
        let calls = AtomicU32::new(0);
        let (result, stats): (Result<()>, RetryStats) = run_with_retry(&policy, &|_| false, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DownloadError::Network("nope".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(stats.attempt_number, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stops_immediately_on_success() {
        let policy = RetryPolicy {
            stop: StopCondition::AfterAttempt(5),
            wait: WaitPolicy::None,
        };
        let (result, stats) = run_with_retry(&policy, &|_| false, |_attempt| async { Ok::<_, DownloadError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(stats.attempt_number, 1);
    }

    #[tokio::test]
    async fn non_retriable_errors_abort_immediately() {
        let policy = RetryPolicy {
            stop: StopCondition::Never,
            wait: WaitPolicy::None,
        };
        let (result, stats): (Result<()>, RetryStats) =
            run_with_retry(&policy, &|_| false, |_attempt| async { Err(DownloadError::Config("bad".to_string())) }).await;
        assert!(result.is_err());
        assert_eq!(stats.attempt_number, 1);
    }
}
