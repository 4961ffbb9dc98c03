use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

use super::AsyncTask;
use crate::metrics::TASK_SCHEDULERS_METRIC;
use crate::ReadySignal;
use crate::Result;
use crate::TaskConfig;
use crate::TaskError;

/// FIFO, worker and latest outcome of one task key
struct TaskScheduler<T> {
    key: String,
    tx: mpsc::UnboundedSender<Arc<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<T>>>>,
    latest: Arc<ArcSwap<T>>,
    /// Held for the whole of every `execute` of this key
    exec: Arc<tokio::sync::Mutex<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<T: AsyncTask> TaskScheduler<T> {
    /// `exec` is shared with a reclaimed scheduler of the same key whose
    /// worker may still be executing
    fn new(
        task: Arc<T>,
        exec: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            key: task.key().to_string(),
            tx,
            rx: Mutex::new(Some(rx)),
            latest: Arc::new(ArcSwap::new(task)),
            exec,
            worker: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Queues `task` and reports the error retained by the latest handled task.
    fn add_task(
        &self,
        task: Arc<T>,
    ) -> Result<()> {
        self.ensure_worker();
        if self.tx.send(task).is_err() {
            return Err(TaskError::Expired(self.key.clone()).into());
        }

        match self.latest.load().err() {
            Some(cause) => Err(TaskError::Failed {
                key: self.key.clone(),
                cause,
            }
            .into()),
            None => Ok(()),
        }
    }

    fn ensure_worker(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let handle = tokio::spawn(run_worker(
            self.key.clone(),
            rx,
            self.latest.clone(),
            self.exec.clone(),
            self.shutdown.clone(),
        ));
        *self.worker.lock() = Some(handle);
    }

    fn close(&self) -> Option<JoinHandle<()>> {
        self.shutdown.cancel();
        self.worker.lock().take()
    }
}

async fn run_worker<T: AsyncTask>(
    key: String,
    mut rx: mpsc::UnboundedReceiver<Arc<T>>,
    latest: Arc<ArcSwap<T>>,
    exec: Arc<tokio::sync::Mutex<()>>,
    shutdown: CancellationToken,
) {
    trace!(key = %key, "task worker started");
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        let _guard = exec.lock().await;
        if shutdown.is_cancelled() {
            debug!(key = %key, "scheduler torn down, dequeued task skipped");
            break;
        }
        if let Err(e) = task.execute().await {
            debug!(key = %key, "task failed: {}", e);
        }
        latest.store(task);
    }
    trace!(key = %key, "task worker stopped");
}

struct Schedulers<T> {
    by_key: HashMap<String, Arc<TaskScheduler<T>>>,
    /// Keys whose schedulers the daemon tears down on its next tick
    marked: HashSet<String>,
    /// Exec locks of reclaimed schedulers, kept while their worker may still
    /// be running so that a new scheduler of the key waits for it
    retired: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
    stopped: bool,
}

impl<T: AsyncTask> Schedulers<T> {
    fn remove(
        &mut self,
        key: &str,
    ) -> Option<JoinHandle<()>> {
        self.marked.remove(key);
        let handle = self.by_key.remove(key).and_then(|s| s.close());
        TASK_SCHEDULERS_METRIC.set(self.by_key.len() as i64);
        debug!(key = %key, "task scheduler removed");
        handle
    }

    fn reclaim(&mut self) -> usize {
        // Only the map holds the lock once the old worker has exited
        self.retired.retain(|_, exec| Arc::strong_count(exec) > 1);

        let keys: Vec<String> = self.marked.drain().collect();
        for key in &keys {
            if let Some(scheduler) = self.by_key.get(key) {
                self.retired.insert(key.clone(), scheduler.exec.clone());
            }
            // Workers exit on their own once cancelled
            drop(self.remove(key));
        }
        keys.len()
    }

    /// Exec lock for a new scheduler of `key`
    fn exec_lock(
        &mut self,
        key: &str,
    ) -> Arc<tokio::sync::Mutex<()>> {
        self.retired
            .remove(key)
            .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())))
    }
}

enum Slot<T> {
    /// The key was unknown; the caller runs the task inline holding the guard
    New(OwnedMutexGuard<()>),
    Existing(Arc<TaskScheduler<T>>),
}

/// Runs tasks one at a time per key.
///
/// The first task of an unknown key runs inline on the caller and its result
/// is returned directly. Later tasks are queued on the key's FIFO and executed
/// by a lazily started worker; `add` then reports the error retained by the
/// most recently handled task. Schedulers live until [`defer_remove`] marks
/// them and the reclamation daemon tears them down.
///
/// [`defer_remove`]: AsyncTaskService::defer_remove
pub struct AsyncTaskService<T> {
    config: TaskConfig,
    schedulers: Arc<RwLock<Schedulers<T>>>,
    shutdown: CancellationToken,
    daemon: Mutex<Option<JoinHandle<()>>>,
    ready: ReadySignal,
}

impl<T: AsyncTask> AsyncTaskService<T> {
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            schedulers: Arc::new(RwLock::new(Schedulers {
                by_key: HashMap::new(),
                marked: HashSet::new(),
                retired: HashMap::new(),
                stopped: false,
            })),
            shutdown: CancellationToken::new(),
            daemon: Mutex::new(None),
            ready: ReadySignal::new(),
        }
    }

    /// Submits `task` to its key's scheduler.
    pub async fn add(
        &self,
        task: Arc<T>,
    ) -> Result<()> {
        match self.get_or_create(&task)? {
            Slot::New(_guard) => task.execute().await,
            Slot::Existing(scheduler) => scheduler.add_task(task),
        }
    }

    fn get_or_create(
        &self,
        task: &Arc<T>,
    ) -> Result<Slot<T>> {
        let key = task.key();
        {
            let schedulers = self.schedulers.read();
            if schedulers.stopped {
                return Err(TaskError::ServiceStopped.into());
            }
            if !schedulers.marked.contains(key) {
                if let Some(scheduler) = schedulers.by_key.get(key) {
                    return Ok(Slot::Existing(scheduler.clone()));
                }
            }
        }

        let mut schedulers = self.schedulers.write();
        if schedulers.stopped {
            return Err(TaskError::ServiceStopped.into());
        }
        // New work revives a key marked for removal
        if schedulers.marked.remove(key) {
            debug!(key = %key, "removal mark cancelled by new task");
        }
        if let Some(scheduler) = schedulers.by_key.get(key) {
            return Ok(Slot::Existing(scheduler.clone()));
        }

        let exec = schedulers.exec_lock(key);
        let scheduler = Arc::new(TaskScheduler::new(task.clone(), exec));
        let slot = match scheduler.exec.clone().try_lock_owned() {
            Ok(guard) => Slot::New(guard),
            Err(_) => Slot::Existing(scheduler.clone()),
        };
        schedulers.by_key.insert(key.to_string(), scheduler);
        TASK_SCHEDULERS_METRIC.set(schedulers.by_key.len() as i64);
        trace!(key = %key, "task scheduler created");
        Ok(slot)
    }

    /// Marks the scheduler of `key` for removal on the next daemon tick.
    ///
    /// Idempotent; a no-op for unknown keys. Fails once the service is stopped.
    pub fn defer_remove(
        &self,
        key: &str,
    ) -> Result<()> {
        let mut schedulers = self.schedulers.write();
        if schedulers.stopped {
            return Err(TaskError::ServiceStopped.into());
        }
        if schedulers.by_key.contains_key(key) {
            schedulers.marked.insert(key.to_string());
        }
        Ok(())
    }

    /// Latest task handled for `key`, or `TaskError::Expired` if the key has
    /// no scheduler.
    pub fn latest_handled(
        &self,
        key: &str,
    ) -> Result<Arc<T>> {
        match self.schedulers.read().by_key.get(key) {
            Some(scheduler) => Ok(scheduler.latest.load_full()),
            None => Err(TaskError::Expired(key.to_string()).into()),
        }
    }

    /// Number of live schedulers
    pub fn len(&self) -> usize {
        self.schedulers.read().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts the reclamation daemon. Calling `run` twice is a no-op.
    pub fn run(&self) {
        let mut daemon = self.daemon.lock();
        if daemon.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        *daemon = Some(tokio::spawn(remove_daemon(
            self.schedulers.clone(),
            self.config.remove_interval(),
            self.shutdown.clone(),
            self.ready.clone(),
        )));
        info!(interval = ?self.config.remove_interval(), "async task service started");
    }

    /// Tears down every scheduler and the daemon. Idempotent.
    pub async fn stop(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut schedulers = self.schedulers.write();
            if schedulers.stopped {
                return;
            }
            schedulers.stopped = true;
            let keys: Vec<String> = schedulers.by_key.keys().cloned().collect();
            keys.iter().filter_map(|key| schedulers.remove(key)).collect()
        };
        self.shutdown.cancel();

        let daemon = self.daemon.lock().take();
        for handle in workers.into_iter().chain(daemon) {
            if let Err(e) = handle.await {
                error!("task worker join failed: {:?}", e);
            }
        }
        self.ready.fire();
        info!("async task service stopped");
    }

    /// Resolves once the daemon is running, or on stop
    pub async fn ready(&self) {
        self.ready.wait().await
    }
}

async fn remove_daemon<T: AsyncTask>(
    schedulers: Arc<RwLock<Schedulers<T>>>,
    period: Duration,
    shutdown: CancellationToken,
    ready: ReadySignal,
) {
    ready.fire();
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = schedulers.write().reclaim();
                if removed > 0 {
                    info!(removed, "task scheduler reclamation completed");
                }
            }
        }
    }
    debug!("task reclamation daemon stopped");
}
