//! Retry policy: a pure function of fault class, attempt number and options.

use std::time::Duration;

use crate::classify::FaultClass;
use crate::options::TransactionOptions;

/// Backoff base: attempt `n` waits `BASE_BACKOFF * 2^n`
pub const BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Exponential backoff for the given zero-based attempt, capped at [`MAX_BACKOFF`].
pub fn backoff(attempt: u32) -> Duration {
    // 2^6 * 100ms already exceeds the cap
    let factor = 1u32 << attempt.min(6);
    BASE_BACKOFF.saturating_mul(factor).min(MAX_BACKOFF)
}

/// Decide whether a failed attempt is retried.
///
/// `attempt` is zero-based; the last permitted attempt is `options.max_retries`.
pub fn decide(class: FaultClass, attempt: u32, options: &TransactionOptions) -> RetryDecision {
    if attempt >= options.max_retries {
        return RetryDecision::GiveUp;
    }

    let retryable = match class {
        FaultClass::Connection => true,
        FaultClass::Contention(_) => options.retry_on_deadlock,
        FaultClass::Permanent => false,
    };

    if retryable {
        RetryDecision::Retry {
            delay: backoff(attempt),
        }
    } else {
        RetryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ContentionKind;

    const DEADLOCK: FaultClass = FaultClass::Contention(ContentionKind::Deadlock);

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(0), Duration::from_millis(100));
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(5), Duration::from_millis(3200));
        assert_eq!(backoff(6), MAX_BACKOFF);
        assert_eq!(backoff(u32::MAX), MAX_BACKOFF);
    }

    #[test]
    fn contention_respects_retry_flag() {
        let opts = TransactionOptions::default();
        assert_eq!(
            decide(DEADLOCK, 0, &opts),
            RetryDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );

        let opts = opts.with_retry_on_deadlock(false);
        assert_eq!(decide(DEADLOCK, 0, &opts), RetryDecision::GiveUp);
    }

    #[test]
    fn connection_faults_retry_even_without_deadlock_retry() {
        let opts = TransactionOptions::default().with_retry_on_deadlock(false);
        assert!(matches!(
            decide(FaultClass::Connection, 1, &opts),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn permanent_never_retries() {
        let opts = TransactionOptions::default().with_max_retries(10);
        assert_eq!(decide(FaultClass::Permanent, 0, &opts), RetryDecision::GiveUp);
    }

    #[test]
    fn last_attempt_gives_up() {
        let opts = TransactionOptions::default().with_max_retries(2);
        assert!(matches!(decide(DEADLOCK, 1, &opts), RetryDecision::Retry { .. }));
        assert_eq!(decide(DEADLOCK, 2, &opts), RetryDecision::GiveUp);

        let opts = opts.with_max_retries(0);
        assert_eq!(decide(FaultClass::Connection, 0, &opts), RetryDecision::GiveUp);
    }
}
