use std::fmt;
use std::sync::Arc;

use crate::cache::EventType;
use crate::constants::HEALTH_CHECKER_SUBJECT;
use crate::store::KeyValue;
use crate::ServiceInstance;

/// Notification channel; every type has its own queue and worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyType {
    /// Subscriber failure reports, consumed by the health checker
    HealthCheck,
    Instance,
}

impl NotifyType {
    pub const ALL: [NotifyType; 2] = [NotifyType::HealthCheck, NotifyType::Instance];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyType::HealthCheck => "NOTIFY",
            NotifyType::Instance => "INSTANCE",
        }
    }
}

impl fmt::Display for NotifyType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An instance record changed
#[derive(Debug, Clone)]
pub struct InstanceChange {
    pub action: EventType,
    pub key: String,
    pub instance: Arc<KeyValue<ServiceInstance>>,
}

#[derive(Debug, Clone)]
pub enum JobPayload {
    Instance(InstanceChange),
    /// A subscriber hit a terminal error and must be removed
    SubscriberFailed {
        notify_type: NotifyType,
        subject: String,
        id: String,
        uid: String,
        message: String,
    },
}

/// One unit of change routed to the subscribers of a subject.
///
/// Without a `subscriber_id` the job is broadcast to every subscriber of the
/// subject, otherwise it is unicast to the subscribers registered under that
/// id. A negative `revision` is never deduplicated.
#[derive(Debug, Clone)]
pub struct NotifyJob {
    pub notify_type: NotifyType,
    pub subject: String,
    pub subscriber_id: Option<String>,
    pub revision: i64,
    pub payload: JobPayload,
}

impl NotifyJob {
    pub fn instance(
        subject: impl Into<String>,
        revision: i64,
        change: InstanceChange,
    ) -> Self {
        Self {
            notify_type: NotifyType::Instance,
            subject: subject.into(),
            subscriber_id: None,
            revision,
            payload: JobPayload::Instance(change),
        }
    }

    /// Report for the health checker about a failed subscriber
    pub fn subscriber_failed(
        notify_type: NotifyType,
        subject: impl Into<String>,
        id: impl Into<String>,
        uid: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notify_type: NotifyType::HealthCheck,
            subject: HEALTH_CHECKER_SUBJECT.to_string(),
            subscriber_id: Some(HEALTH_CHECKER_SUBJECT.to_string()),
            revision: -1,
            payload: JobPayload::SubscriberFailed {
                notify_type,
                subject: subject.into(),
                id: id.into(),
                uid: uid.into(),
                message: message.into(),
            },
        }
    }

    pub fn to_subscriber(
        mut self,
        subscriber_id: impl Into<String>,
    ) -> Self {
        self.subscriber_id = Some(subscriber_id.into());
        self
    }
}
