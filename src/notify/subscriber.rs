use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use nanoid::nanoid;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;

use super::NotifyHandle;
use super::NotifyJob;
use super::NotifyType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Created,
    /// Registered; the initial sync may still be running
    Accepted,
    /// Initial sync finished, receiving deliveries
    Active,
    Closed,
}

/// Identity and shared state every subscriber carries.
///
/// `id` groups the connections of one logical watcher under a subject and is
/// the unicast address; `uid` identifies this very connection.
#[derive(Debug)]
pub struct SubscriberBase {
    uid: String,
    notify_type: NotifyType,
    subject: String,
    id: String,
    revision: AtomicI64,
    state: Mutex<SubscriberState>,
    err: Mutex<Option<String>>,
    service: Mutex<Option<NotifyHandle>>,
}

impl SubscriberBase {
    pub fn new(
        notify_type: NotifyType,
        subject: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            uid: nanoid!(),
            notify_type,
            subject: subject.into(),
            id: id.into(),
            revision: AtomicI64::new(0),
            state: Mutex::new(SubscriberState::Created),
            err: Mutex::new(None),
            service: Mutex::new(None),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn notify_type(&self) -> NotifyType {
        self.notify_type
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    pub(crate) fn set_state(
        &self,
        state: SubscriberState,
    ) {
        let mut current = self.state.lock();
        // Closed is terminal
        if *current != SubscriberState::Closed {
            *current = state;
        }
    }

    /// Revision of the last job handed to the consumer
    pub fn revision(&self) -> i64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub(crate) fn set_revision(
        &self,
        revision: i64,
    ) {
        self.revision.fetch_max(revision, Ordering::SeqCst);
    }

    /// Records `revision` as delivered unless it is not newer than the last
    /// one. Negative revisions are always accepted.
    pub(crate) fn advance_revision(
        &self,
        revision: i64,
    ) -> bool {
        if revision < 0 {
            return true;
        }
        self.revision
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                (revision > last).then_some(revision)
            })
            .is_ok()
    }

    pub fn err(&self) -> Option<String> {
        self.err.lock().clone()
    }

    pub(crate) fn bind(
        &self,
        service: NotifyHandle,
    ) {
        *self.service.lock() = Some(service);
        self.set_state(SubscriberState::Accepted);
    }

    pub(crate) fn service(&self) -> Option<NotifyHandle> {
        self.service.lock().clone()
    }

    /// Records a terminal error and reports it to the health checker, which
    /// removes the subscriber. Only the first error is kept and reported.
    pub async fn set_error(
        &self,
        message: impl Into<String>,
    ) {
        let message = message.into();
        {
            let mut err = self.err.lock();
            if err.is_some() {
                return;
            }
            *err = Some(message.clone());
        }
        debug!(
            notify_type = %self.notify_type,
            subject = %self.subject,
            id = %self.id,
            "subscriber failed: {}", message
        );

        let Some(service) = self.service() else {
            return;
        };
        let job = NotifyJob::subscriber_failed(
            self.notify_type,
            self.subject.clone(),
            self.id.clone(),
            self.uid.clone(),
            message,
        );
        if let Err(e) = service.publish(job).await {
            error!(subject = %self.subject, id = %self.id, "report subscriber error failed: {}", e);
        }
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.lock() = SubscriberState::Closed;
    }
}

/// A long-lived consumer registered with the notify service.
///
/// The service calls `on_accept` once after registration, `on_message` for
/// every job routed to the subscriber (one at a time per notify type) and
/// `close` when it removes the subscriber.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    fn base(&self) -> &SubscriberBase;

    fn on_accept(self: Arc<Self>) {}

    async fn on_message(
        &self,
        job: NotifyJob,
    );

    fn close(&self) {
        self.base().mark_closed();
    }
}
