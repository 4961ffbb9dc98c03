use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::HealthChecker;
use super::NotifyJob;
use super::NotifyType;
use super::Subscriber;
use crate::metrics::record_drop;
use crate::metrics::NOTIFY_QUEUE_DEPTH_METRIC;
use crate::metrics::SUBSCRIBERS_METRIC;
use crate::NotifyConfig;
use crate::NotifyError;
use crate::ReadySignal;
use crate::Result;

/// Subscribers of one (type, subject), grouped by subscriber id
type SubjectIndex = HashMap<String, Vec<Arc<dyn Subscriber>>>;

struct NotifyInner {
    config: NotifyConfig,
    index: DashMap<(NotifyType, String), SubjectIndex>,
    queues: HashMap<NotifyType, mpsc::Sender<NotifyJob>>,
    receivers: Mutex<Option<HashMap<NotifyType, mpsc::Receiver<NotifyJob>>>>,
    /// Closed until `run`, and again after `stop`
    closed: AtomicBool,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ready: ReadySignal,
}

/// Typed publish/subscribe fan-out.
///
/// ```text
/// publish ──try_send / send_timeout──► queue[type] ──► worker[type]
///                                                        │ (type, subject) lookup
///                                                        ▼
///                                        subscriber.on_message (unicast by id or broadcast)
/// ```
///
/// Cloning is cheap; every clone drives the same service.
#[derive(Clone)]
pub struct NotifyService {
    inner: Arc<NotifyInner>,
}

/// Non-owning reference to a [`NotifyService`], held by subscribers so that
/// registration does not keep the service alive.
#[derive(Clone)]
pub struct NotifyHandle {
    inner: Weak<NotifyInner>,
}

impl std::fmt::Debug for NotifyHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("NotifyHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl NotifyHandle {
    pub fn upgrade(&self) -> Option<NotifyService> {
        self.inner.upgrade().map(|inner| NotifyService { inner })
    }

    pub async fn publish(
        &self,
        job: NotifyJob,
    ) -> Result<()> {
        match self.upgrade() {
            Some(service) => service.publish(job).await,
            None => Err(NotifyError::ServiceClosed.into()),
        }
    }
}

impl NotifyService {
    pub fn new(config: NotifyConfig) -> Self {
        let mut queues = HashMap::with_capacity(NotifyType::ALL.len());
        let mut receivers = HashMap::with_capacity(NotifyType::ALL.len());
        for notify_type in NotifyType::ALL {
            let (tx, rx) = mpsc::channel(config.queue_size);
            queues.insert(notify_type, tx);
            receivers.insert(notify_type, rx);
        }

        Self {
            inner: Arc::new(NotifyInner {
                config,
                index: DashMap::new(),
                queues,
                receivers: Mutex::new(Some(receivers)),
                closed: AtomicBool::new(true),
                shutdown: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
                ready: ReadySignal::new(),
            }),
        }
    }

    pub fn downgrade(&self) -> NotifyHandle {
        NotifyHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.inner.config
    }

    /// Starts one worker per notify type and registers the health checker.
    /// A service can run once; later calls are no-ops.
    pub fn run(&self) {
        let Some(receivers) = self.inner.receivers.lock().take() else {
            warn!("notify service is already running or stopped");
            return;
        };
        self.inner.closed.store(false, Ordering::SeqCst);

        {
            let mut workers = self.inner.workers.lock();
            for (notify_type, rx) in receivers {
                workers.push(tokio::spawn(dispatch_worker(
                    self.downgrade(),
                    notify_type,
                    rx,
                    self.inner.shutdown.clone(),
                )));
            }
        }

        if let Err(e) = self.add_subscriber(Arc::new(HealthChecker::new())) {
            error!("register health checker failed: {}", e);
        }
        self.inner.ready.fire();
        info!(
            queue_size = self.inner.config.queue_size,
            "notify service started"
        );
    }

    /// Stops the workers, then closes and removes every subscriber.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            // Never ran, or already stopped
            self.inner.receivers.lock().take();
            self.inner.ready.fire();
            return;
        }
        self.inner.shutdown.cancel();

        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                error!("notify worker join failed: {:?}", e);
            }
        }
        self.remove_all_subscribers();
        self.inner.ready.fire();
        info!("notify service stopped");
    }

    /// Resolves once the workers run, or on stop
    pub async fn ready(&self) {
        self.inner.ready.wait().await
    }

    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Registers `subscriber` and calls its `on_accept`.
    pub fn add_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<()> {
        if self.closed() {
            return Err(NotifyError::ServiceClosed.into());
        }

        let base = subscriber.base();
        let notify_type = base.notify_type();
        if !self.inner.queues.contains_key(&notify_type) {
            return Err(NotifyError::UnknownType.into());
        }

        self.inner
            .index
            .entry((notify_type, base.subject().to_string()))
            .or_default()
            .entry(base.id().to_string())
            .or_default()
            .push(subscriber.clone());
        base.bind(self.downgrade());
        SUBSCRIBERS_METRIC
            .with_label_values(&[notify_type.as_str()])
            .inc();
        debug!(
            notify_type = %notify_type,
            subject = %base.subject(),
            id = %base.id(),
            uid = %base.uid(),
            "subscriber added"
        );

        subscriber.on_accept();
        Ok(())
    }

    /// Removes and closes `subscriber`; a no-op if it is not registered.
    pub fn remove_subscriber(
        &self,
        subscriber: &dyn Subscriber,
    ) {
        let base = subscriber.base();
        self.remove_subscriber_by_uid(
            base.notify_type(),
            base.subject(),
            base.id(),
            base.uid(),
        );
    }

    pub(crate) fn remove_subscriber_by_uid(
        &self,
        notify_type: NotifyType,
        subject: &str,
        id: &str,
        uid: &str,
    ) -> bool {
        let mut removed = None;
        self.inner
            .index
            .remove_if_mut(&(notify_type, subject.to_string()), |_, by_id| {
                if let Some(subscribers) = by_id.get_mut(id) {
                    if let Some(pos) = subscribers.iter().position(|s| s.base().uid() == uid) {
                        removed = Some(subscribers.remove(pos));
                    }
                    if subscribers.is_empty() {
                        by_id.remove(id);
                    }
                }
                by_id.is_empty()
            });

        let Some(subscriber) = removed else {
            return false;
        };
        subscriber.close();
        SUBSCRIBERS_METRIC
            .with_label_values(&[notify_type.as_str()])
            .dec();
        debug!(
            notify_type = %notify_type,
            subject = %subject,
            id = %id,
            uid = %uid,
            "subscriber removed"
        );
        true
    }

    /// Closes and removes every subscriber, the health checker included.
    pub fn remove_all_subscribers(&self) {
        let keys: Vec<(NotifyType, String)> =
            self.inner.index.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            let Some((_, by_id)) = self.inner.index.remove(&key) else {
                continue;
            };
            for subscriber in by_id.into_values().flatten() {
                subscriber.close();
                SUBSCRIBERS_METRIC
                    .with_label_values(&[key.0.as_str()])
                    .dec();
            }
        }
    }

    /// Number of subscribers registered for `notify_type`
    pub fn subscriber_count(
        &self,
        notify_type: NotifyType,
    ) -> usize {
        self.inner
            .index
            .iter()
            .filter(|e| e.key().0 == notify_type)
            .map(|e| e.value().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Queues `job` on its type's queue.
    ///
    /// Tries a non-blocking send first, then waits up to `add_timeout` for
    /// room; a job that still does not fit is dropped and reported.
    pub async fn publish(
        &self,
        job: NotifyJob,
    ) -> Result<()> {
        if self.closed() {
            return Err(NotifyError::ServiceClosed.into());
        }
        let notify_type = job.notify_type;
        let tx = self
            .inner
            .queues
            .get(&notify_type)
            .ok_or(NotifyError::UnknownType)?;

        let result = match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(NotifyError::ServiceClosed.into()),
            Err(TrySendError::Full(job)) => {
                let timeout = self.inner.config.add_timeout();
                match tx.send_timeout(job, timeout).await {
                    Ok(()) => Ok(()),
                    Err(SendTimeoutError::Closed(_)) => Err(NotifyError::ServiceClosed.into()),
                    Err(SendTimeoutError::Timeout(job)) => {
                        error!(
                            notify_type = %notify_type,
                            subject = %job.subject,
                            revision = job.revision,
                            "notify queue is full, job dropped"
                        );
                        record_drop("notify", notify_type.as_str());
                        Err(NotifyError::QueueTimeout {
                            notify_type: notify_type.as_str(),
                            timeout,
                        }
                        .into())
                    }
                }
            }
        };

        NOTIFY_QUEUE_DEPTH_METRIC
            .with_label_values(&[notify_type.as_str()])
            .set(self.queue_depth(notify_type) as i64);
        result
    }

    /// Jobs waiting in the queue of `notify_type`
    pub fn queue_depth(
        &self,
        notify_type: NotifyType,
    ) -> usize {
        self.inner
            .queues
            .get(&notify_type)
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Subscribers a job is routed to: the ones under its subscriber id when
    /// set, otherwise every subscriber of the subject.
    fn targets(
        &self,
        job: &NotifyJob,
    ) -> Vec<Arc<dyn Subscriber>> {
        let Some(by_id) = self
            .inner
            .index
            .get(&(job.notify_type, job.subject.clone()))
        else {
            return Vec::new();
        };
        match &job.subscriber_id {
            Some(id) => by_id.get(id).cloned().unwrap_or_default(),
            None => by_id.values().flatten().cloned().collect(),
        }
    }
}

async fn dispatch_worker(
    service: NotifyHandle,
    notify_type: NotifyType,
    mut rx: mpsc::Receiver<NotifyJob>,
    shutdown: CancellationToken,
) {
    debug!(notify_type = %notify_type, "notify worker started");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let Some(svc) = service.upgrade() else {
            break;
        };
        NOTIFY_QUEUE_DEPTH_METRIC
            .with_label_values(&[notify_type.as_str()])
            .set(svc.queue_depth(notify_type) as i64);
        let targets = svc.targets(&job);
        drop(svc);
        trace!(
            notify_type = %notify_type,
            subject = %job.subject,
            subscriber_id = ?job.subscriber_id,
            revision = job.revision,
            targets = targets.len(),
            "dispatch notify job"
        );
        for subscriber in targets {
            subscriber.on_message(job.clone()).await;
        }
    }
    debug!(notify_type = %notify_type, "notify worker stopped");
}
