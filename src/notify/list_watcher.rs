use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::JobPayload;
use super::NotifyJob;
use super::NotifyType;
use super::Subscriber;
use super::SubscriberBase;
use super::SubscriberState;
use crate::metrics::record_drop;
use crate::ReadySignal;
use crate::Result;

/// Initial snapshot of a watcher: payloads and the revision they were read at
pub type ListFuture = BoxFuture<'static, Result<(Vec<JobPayload>, i64)>>;
pub type ListFn = Box<dyn FnOnce() -> ListFuture + Send>;

/// Subscriber that forwards jobs into a bounded channel after an initial
/// list.
///
/// Accepting the watcher starts the list in the background. Deliveries wait
/// for it to finish, for at most the configured timeout. Jobs whose revision
/// is not newer than the last delivered one are dropped, so a watch stream
/// replaying events never reaches the consumer twice. A dropped receiver
/// fails the watcher and gets it removed by the health checker.
pub struct ListWatcher {
    base: SubscriberBase,
    tx: Mutex<Option<mpsc::Sender<NotifyJob>>>,
    list_fn: Mutex<Option<ListFn>>,
    list_done: ReadySignal,
    timeout: Duration,
}

impl ListWatcher {
    pub fn new(
        notify_type: NotifyType,
        subject: impl Into<String>,
        id: impl Into<String>,
        buffer_size: usize,
        timeout: Duration,
        list_fn: Option<ListFn>,
    ) -> (Arc<Self>, mpsc::Receiver<NotifyJob>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let watcher = Arc::new(Self {
            base: SubscriberBase::new(notify_type, subject, id),
            tx: Mutex::new(Some(tx)),
            list_fn: Mutex::new(list_fn),
            list_done: ReadySignal::new(),
            timeout,
        });
        (watcher, rx)
    }

    /// True once the initial list has been delivered (or has failed)
    pub fn listed(&self) -> bool {
        self.list_done.is_ready()
    }

    async fn list_and_publish(&self) {
        let list_fn = self.list_fn.lock().take();
        if let Some(list_fn) = list_fn {
            match list_fn().await {
                Ok((payloads, revision)) => {
                    self.base.set_revision(revision);
                    debug!(
                        subject = %self.base.subject(),
                        id = %self.base.id(),
                        revision,
                        items = payloads.len(),
                        "initial list done"
                    );
                    for payload in payloads {
                        self.deliver(NotifyJob {
                            notify_type: self.base.notify_type(),
                            subject: self.base.subject().to_string(),
                            subscriber_id: Some(self.base.id().to_string()),
                            revision,
                            payload,
                        })
                        .await;
                    }
                }
                Err(e) => {
                    self.base.set_error(format!("initial list failed: {e}")).await;
                }
            }
        }
        self.base.set_state(SubscriberState::Active);
        self.list_done.fire();
    }

    async fn send_message(
        &self,
        job: NotifyJob,
    ) {
        if !self.base.advance_revision(job.revision) {
            warn!(
                notify_type = %job.notify_type,
                subject = %self.base.subject(),
                id = %self.base.id(),
                revision = job.revision,
                current = self.base.revision(),
                "stale or duplicate job dropped"
            );
            return;
        }
        self.deliver(job).await;
    }

    async fn deliver(
        &self,
        job: NotifyJob,
    ) {
        let Some(tx) = self.tx.lock().clone() else {
            return;
        };

        let job = match tx.try_send(job) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                self.base.set_error("receiver closed").await;
                return;
            }
            Err(TrySendError::Full(job)) => job,
        };
        match tx.send_timeout(job, self.timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Closed(_)) => {
                self.base.set_error("receiver closed").await;
            }
            Err(SendTimeoutError::Timeout(job)) => {
                error!(
                    subject = %self.base.subject(),
                    id = %self.base.id(),
                    revision = job.revision,
                    timeout = ?self.timeout,
                    "subscriber queue is full, job dropped"
                );
                record_drop("subscriber", self.base.notify_type().as_str());
            }
        }
    }
}

#[async_trait]
impl Subscriber for ListWatcher {
    fn base(&self) -> &SubscriberBase {
        &self.base
    }

    fn on_accept(self: Arc<Self>) {
        if self.base.err().is_some() {
            return;
        }
        tokio::spawn(async move { self.list_and_publish().await });
    }

    async fn on_message(
        &self,
        job: NotifyJob,
    ) {
        if self.base.err().is_some() || self.base.state() == SubscriberState::Closed {
            return;
        }

        if !self.list_done.is_ready()
            && tokio::time::timeout(self.timeout, self.list_done.wait())
                .await
                .is_err()
        {
            warn!(
                subject = %self.base.subject(),
                id = %self.base.id(),
                timeout = ?self.timeout,
                "watcher is not ready, deliver anyway"
            );
        }
        self.send_message(job).await;
    }

    fn close(&self) {
        self.base.mark_closed();
        self.tx.lock().take();
    }
}
