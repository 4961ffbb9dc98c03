use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::sleep;

use super::*;
use crate::Error;
use crate::Result;
use crate::StoreError;
use crate::TaskConfig;
use crate::TaskError;

/// Shared observations of every task built against one tracker
#[derive(Default, Debug)]
struct Tracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    executed: Mutex<Vec<usize>>,
}

impl Tracker {
    fn executed(&self) -> Vec<usize> {
        self.executed.lock().clone()
    }
}

#[derive(Debug)]
struct TrackedTask {
    key: String,
    seq: usize,
    delay: Duration,
    fail: bool,
    tracker: Arc<Tracker>,
    err: Mutex<Option<Arc<Error>>>,
}

impl TrackedTask {
    fn new(
        key: &str,
        seq: usize,
        tracker: &Arc<Tracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            seq,
            delay: Duration::from_millis(5),
            fail: false,
            tracker: tracker.clone(),
            err: Mutex::new(None),
        })
    }

    fn failing(
        key: &str,
        seq: usize,
        tracker: &Arc<Tracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            seq,
            delay: Duration::from_millis(5),
            fail: true,
            tracker: tracker.clone(),
            err: Mutex::new(None),
        })
    }

    fn slow(
        key: &str,
        seq: usize,
        delay_ms: u64,
        tracker: &Arc<Tracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: key.to_string(),
            seq,
            delay: Duration::from_millis(delay_ms),
            fail: false,
            tracker: tracker.clone(),
            err: Mutex::new(None),
        })
    }
}

#[async_trait]
impl AsyncTask for TrackedTask {
    fn key(&self) -> &str {
        &self.key
    }

    async fn execute(&self) -> Result<()> {
        let now = self.tracker.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.max_in_flight.fetch_max(now, Ordering::SeqCst);
        sleep(self.delay).await;
        self.tracker.executed.lock().push(self.seq);
        self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            *self.err.lock() = Some(Arc::new(
                StoreError::Unavailable("renew refused".to_string()).into(),
            ));
            return Err(StoreError::Unavailable("renew refused".to_string()).into());
        }
        Ok(())
    }

    fn err(&self) -> Option<Arc<Error>> {
        self.err.lock().clone()
    }
}

fn service() -> Arc<AsyncTaskService<TrackedTask>> {
    Arc::new(AsyncTaskService::new(TaskConfig {
        remove_interval_ms: 100,
    }))
}

async fn wait_executed(
    tracker: &Tracker,
    n: usize,
) {
    for _ in 0..500 {
        if tracker.executed().len() >= n {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("only {} of {n} tasks executed", tracker.executed().len());
}

#[tokio::test]
async fn test_first_task_runs_inline() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());

    svc.add(TrackedTask::new("k", 1, &tracker)).await.unwrap();
    // Already executed when add returns
    assert_eq!(tracker.executed(), vec![1]);
    assert_eq!(svc.latest_handled("k").unwrap().seq, 1);
}

#[tokio::test]
async fn test_first_task_error_is_returned_directly() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());

    let err = svc.add(TrackedTask::failing("k", 1, &tracker)).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn test_later_add_reports_latest_handled_error() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());

    let _ = svc.add(TrackedTask::failing("k", 1, &tracker)).await;
    let err = svc.add(TrackedTask::new("k", 2, &tracker)).await.unwrap_err();
    assert!(matches!(err, Error::Task(TaskError::Failed { .. })));

    wait_executed(&tracker, 2).await;
    // The successful task is now the latest handled one
    for _ in 0..100 {
        if svc.latest_handled("k").unwrap().seq == 2 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(svc.add(TrackedTask::new("k", 3, &tracker)).await.is_ok());
}

#[tokio::test]
async fn test_tasks_of_one_key_never_overlap_and_keep_order() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());

    let adds = (1..=20).map(|seq| {
        let svc = svc.clone();
        let task = TrackedTask::new("lease:/a", seq, &tracker);
        async move { svc.add(task).await }
    });
    for result in join_all(adds).await {
        assert!(result.is_ok());
    }

    wait_executed(&tracker, 20).await;
    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.executed(), (1..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_distinct_keys_run_concurrently() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());
    let slow = |key: &str, seq| {
        Arc::new(TrackedTask {
            key: key.to_string(),
            seq,
            delay: Duration::from_millis(50),
            fail: false,
            tracker: tracker.clone(),
            err: Mutex::new(None),
        })
    };

    let (a, b) = tokio::join!(svc.add(slow("a", 1)), svc.add(slow("b", 2)));
    a.unwrap();
    b.unwrap();
    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_back_to_back_tasks_latest_is_second() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());

    let first = TrackedTask::new("lease:x", 1, &tracker);
    let second = TrackedTask::new("lease:x", 2, &tracker);
    let (r1, r2) = tokio::join!(svc.add(first), svc.add(second));
    r1.unwrap();
    r2.unwrap();

    wait_executed(&tracker, 2).await;
    for _ in 0..100 {
        if svc.latest_handled("lease:x").unwrap().seq == 2 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(svc.latest_handled("lease:x").unwrap().seq, 2);
    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_latest_handled_unknown_key_is_expired() {
    let svc = service();
    let err = svc.latest_handled("nope").unwrap_err();
    assert!(matches!(err, Error::Task(TaskError::Expired(key)) if key == "nope"));
}

#[tokio::test(start_paused = true)]
async fn test_daemon_reclaims_marked_schedulers() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());
    svc.run();
    svc.ready().await;

    svc.add(TrackedTask::new("keep", 1, &tracker)).await.unwrap();
    svc.add(TrackedTask::new("drop", 2, &tracker)).await.unwrap();
    svc.defer_remove("drop").unwrap();
    svc.defer_remove("drop").unwrap();
    svc.defer_remove("unknown").unwrap();
    assert_eq!(svc.len(), 2);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(svc.len(), 1);
    assert!(svc.latest_handled("keep").is_ok());
    assert!(matches!(
        svc.latest_handled("drop"),
        Err(Error::Task(TaskError::Expired(_)))
    ));

    svc.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_new_task_cancels_removal_mark() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());
    svc.run();
    svc.ready().await;

    svc.add(TrackedTask::new("k", 1, &tracker)).await.unwrap();
    svc.defer_remove("k").unwrap();
    svc.add(TrackedTask::new("k", 2, &tracker)).await.unwrap();

    sleep(Duration::from_millis(250)).await;
    assert_eq!(svc.len(), 1);
    assert_eq!(tracker.executed(), vec![1, 2]);

    svc.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_task_after_reclamation_waits_for_running_task() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());
    svc.run();
    svc.ready().await;

    // Inline execution still running when the daemon tears the key down
    let inline = tokio::spawn({
        let svc = svc.clone();
        let task = TrackedTask::slow("k", 1, 200, &tracker);
        async move { svc.add(task).await }
    });
    sleep(Duration::from_millis(10)).await;
    svc.add(TrackedTask::slow("k", 2, 200, &tracker)).await.unwrap();
    svc.defer_remove("k").unwrap();

    sleep(Duration::from_millis(140)).await;
    assert!(svc.is_empty());
    assert_eq!(tracker.in_flight.load(Ordering::SeqCst), 1);

    svc.add(TrackedTask::new("k", 3, &tracker)).await.unwrap();
    inline.await.unwrap().unwrap();
    wait_executed(&tracker, 2).await;
    sleep(Duration::from_millis(300)).await;

    assert_eq!(tracker.max_in_flight.load(Ordering::SeqCst), 1);
    // The task queued on the torn down scheduler never runs
    assert_eq!(tracker.executed(), vec![1, 3]);

    svc.stop().await;
}

#[tokio::test]
async fn test_stop_rejects_further_work() {
    let svc = service();
    let tracker = Arc::new(Tracker::default());
    svc.run();
    svc.add(TrackedTask::new("k", 1, &tracker)).await.unwrap();
    svc.add(TrackedTask::new("k", 2, &tracker)).await.unwrap();

    svc.stop().await;
    svc.stop().await;
    svc.ready().await;
    assert!(svc.is_empty());

    assert!(matches!(
        svc.defer_remove("k"),
        Err(Error::Task(TaskError::ServiceStopped))
    ));
    assert!(matches!(
        svc.add(TrackedTask::new("k", 3, &tracker)).await,
        Err(Error::Task(TaskError::ServiceStopped))
    ));
}
