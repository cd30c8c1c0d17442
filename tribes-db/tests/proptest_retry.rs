use proptest::prelude::*;
use std::time::Duration;
use tribes_db::classify::classify_sqlstate;
use tribes_db::retry::{backoff, decide, RetryDecision, MAX_BACKOFF};
use tribes_db::{FaultClass, TransactionOptions};

fn arb_class() -> impl Strategy<Value = FaultClass> {
    prop_oneof![
        Just(FaultClass::Connection),
        Just(classify_sqlstate("40P01")),
        Just(classify_sqlstate("55P03")),
        Just(FaultClass::Permanent),
    ]
}

proptest! {
    /// Property: backoff never shrinks from one attempt to the next
    #[test]
    fn prop_backoff_non_decreasing(attempt in 0u32..1_000) {
        prop_assert!(backoff(attempt) <= backoff(attempt + 1));
    }

    /// Property: backoff stays within [100ms, cap]
    #[test]
    fn prop_backoff_bounded(attempt in any::<u32>()) {
        let delay = backoff(attempt);
        prop_assert!(delay >= Duration::from_millis(100));
        prop_assert!(delay <= MAX_BACKOFF);
    }

    /// Property: no fault class is retried past the attempt budget
    #[test]
    fn prop_budget_is_respected(
        class in arb_class(),
        max_retries in 0u32..10,
        extra in 0u32..10,
        retry_on_deadlock in any::<bool>(),
    ) {
        let options = TransactionOptions::default()
            .with_max_retries(max_retries)
            .with_retry_on_deadlock(retry_on_deadlock);
        prop_assert_eq!(decide(class, max_retries + extra, &options), RetryDecision::GiveUp);
    }

    /// Property: a retry always waits exactly the backoff for its attempt
    #[test]
    fn prop_retry_delay_matches_backoff(class in arb_class(), attempt in 0u32..8) {
        let options = TransactionOptions::default().with_max_retries(10);
        if let RetryDecision::Retry { delay } = decide(class, attempt, &options) {
            prop_assert_eq!(delay, backoff(attempt));
        }
    }
}
