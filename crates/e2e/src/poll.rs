//! Bounded-interval polling shared by every wait in the suite
//!
//! The storefront only offers "ask and see": no push channel exists for payment
//! state, so each wait is one check repeated at a fixed interval until it yields a
//! value or the deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::error::E2eResult;

/// Lower bound for the poll interval, keeps a wait from tight-looping
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound for the poll interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// How often to check and for how long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    /// Build a policy, clamping the interval into the allowed window
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
            timeout,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Run `check` until it returns `Some`, or return `Ok(None)` once the budget is spent.
///
/// The check always runs at least once, and once more at the deadline, so a
/// zero timeout degrades to a single read. Errors from the check abort the wait
/// immediately: a check should only return `Err` for failures that retrying
/// cannot fix.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> E2eResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(value) = check().await? {
            trace!(attempts, "poll resolved");
            return Ok(Some(value));
        }

        let now = Instant::now();
        if now >= deadline {
            trace!(attempts, "poll budget spent");
            return Ok(None);
        }
        sleep(policy.interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn interval_is_clamped() {
        let fast = PollPolicy::new(Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(fast.interval, MIN_POLL_INTERVAL);

        let slow = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(slow.interval, MAX_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_check_yields() {
        let calls = Cell::new(0u32);
        let calls_ref = &calls;
        let policy = PollPolicy::new(Duration::from_millis(500), Duration::from_secs(5));

        let value = poll_until(policy, move || async move {
            calls_ref.set(calls_ref.get() + 1);
            Ok((calls_ref.get() == 3).then_some("ready"))
        })
        .await
        .unwrap();

        assert_eq!(value, Some("ready"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let start = Instant::now();
        let calls = Cell::new(0u32);
        let calls_ref = &calls;
        let policy = PollPolicy::new(Duration::from_millis(1000), Duration::from_millis(2500));

        let value: Option<()> = poll_until(policy, move || async move {
            calls_ref.set(calls_ref.get() + 1);
            Ok(None)
        })
        .await
        .unwrap();

        assert!(value.is_none());
        // t=0, 1s, 2s, and the final check at the 2.5s deadline
        assert_eq!(calls.get(), 4);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(2500) && waited < Duration::from_millis(2600));
    }

    #[tokio::test(start_paused = true)]
    async fn check_error_aborts() {
        let policy = PollPolicy::default();
        let result: E2eResult<Option<()>> = poll_until(policy, || async {
            Err(crate::error::E2eError::AssertionFailed("boom".to_string()))
        })
        .await;
        assert!(result.is_err());
    }
}
