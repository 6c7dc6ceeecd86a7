//! Tests for the retry policy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use steward::error::StewardError;
use steward::util::retry::{PersistentRateLimitHandler, RetryPolicy};

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(100),
        multiplier: 2.0,
    }
}

#[tokio::test(start_paused = true)]
async fn retry_policy_retries_retryable_errors_until_success() {
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy(4)
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(StewardError::Timeout(100))
                } else {
                    Ok::<_, StewardError>("ok")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_policy_stops_immediately_for_non_retryable_errors() {
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy(5)
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StewardError::Authentication("bad-key".to_string()))
            }
        })
        .await;

    match result {
        Err(StewardError::Authentication(message)) => assert_eq!(message, "bad-key"),
        other => panic!("expected authentication error, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_returns_last_error_when_attempts_are_exhausted() {
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy(3)
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StewardError::api(503, "unavailable"))
            }
        })
        .await;

    assert_eq!(result.unwrap_err().status(), Some(503));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_policy_honours_server_retry_delay() {
    let started = tokio::time::Instant::now();
    let attempts = Arc::new(AtomicUsize::new(0));

    let result = policy(2)
        .execute(|| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StewardError::RateLimited {
                        retry_after_ms: Some(3_000),
                    })
                } else {
                    Ok::<_, StewardError>(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert!(started.elapsed() >= Duration::from_millis(3_000));
}

#[tokio::test(start_paused = true)]
async fn persistent_rate_limits_consult_the_handler_and_reset_the_budget() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let consulted = Arc::new(AtomicUsize::new(0));
    let counter = consulted.clone();
    let handler: PersistentRateLimitHandler = Arc::new(move |_error: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Some("fallback-model".to_string()) }.boxed()
    });

    let result = policy(2)
        .execute_with_fallback(
            || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StewardError::RateLimited {
                            retry_after_ms: None,
                        })
                    } else {
                        Ok::<_, StewardError>("switched")
                    }
                }
            },
            Some(&handler),
        )
        .await;

    assert_eq!(result.unwrap(), "switched");
    assert_eq!(consulted.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
