use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::backoff::task_with_timeout_and_exponential_backoff;
use super::backoff::Backoff;
use crate::BackoffPolicy;
use crate::Error;
use crate::StoreError;

fn policy(max_retries: usize) -> BackoffPolicy {
    BackoffPolicy {
        max_retries,
        timeout_ms: 1000,
        base_delay_ms: 10,
        max_delay_ms: 100,
    }
}

#[test]
fn test_backoff_doubles_until_capped() {
    let mut backoff = Backoff::new(policy(0));
    let delays: Vec<Duration> = (0..6).map(|_| backoff.next_delay().unwrap()).collect();

    // 10% jitter at most
    assert!(delays[0] <= Duration::from_millis(10) && delays[0] >= Duration::from_millis(9));
    assert!(delays[1] >= Duration::from_millis(18));
    assert!(delays[2] >= Duration::from_millis(36));
    for delay in &delays[4..] {
        assert!(*delay <= Duration::from_millis(100));
        assert!(*delay >= Duration::from_millis(90));
    }
}

#[test]
fn test_backoff_reset_restarts_from_base() {
    let mut backoff = Backoff::new(policy(0));
    for _ in 0..5 {
        backoff.next_delay();
    }
    backoff.reset();
    assert_eq!(backoff.attempts(), 0);
    assert!(backoff.next_delay().unwrap() <= Duration::from_millis(10));
}

#[test]
fn test_bounded_backoff_exhausts() {
    let mut backoff = Backoff::new(policy(2));
    assert!(backoff.next_delay().is_some());
    assert!(backoff.next_delay().is_some());
    assert!(backoff.next_delay().is_none());
}

#[tokio::test]
async fn test_task_with_timeout_and_exponential_backoff_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            let current = counter.fetch_add(1, Ordering::SeqCst);
            if current == 0 {
                Err(Error::Fatal("First attempt fails".to_string()))
            } else {
                Ok::<_, crate::Error>(current)
            }
        }
    };

    let result = task_with_timeout_and_exponential_backoff(task, policy(3)).await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2); // 1 failure + 1 success
}

#[tokio::test]
async fn test_task_with_timeout_and_exponential_backoff_max_retries() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(Error::Fatal("Always fails".to_string()))
        }
    };

    let result = task_with_timeout_and_exponential_backoff(task, policy(3)).await;

    assert!(matches!(result, Err(Error::Fatal(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_task_with_timeout_and_exponential_backoff_timeout() {
    let task = || async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok::<_, crate::Error>(())
    };

    let result = task_with_timeout_and_exponential_backoff(task, policy(1)).await;

    assert!(matches!(
        result,
        Err(Error::Store(StoreError::Timeout(_)))
    ));
}
