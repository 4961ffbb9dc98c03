use std::time::Duration;

use tokio::time::timeout;

use super::ReadySignal;

#[tokio::test]
async fn test_wait_resolves_after_fire() {
    let signal = ReadySignal::new();
    assert!(!signal.is_ready());

    let waiter = {
        let signal = signal.clone();
        tokio::spawn(async move { signal.wait().await })
    };

    signal.fire();
    timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert!(signal.is_ready());
}

#[tokio::test]
async fn test_fire_twice_is_safe() {
    let signal = ReadySignal::new();
    signal.fire();
    signal.fire();

    timeout(Duration::from_millis(100), signal.wait())
        .await
        .expect("already fired signal resolves immediately");
}
