use async_trait::async_trait;
use tracing::warn;

use super::JobPayload;
use super::NotifyJob;
use super::NotifyType;
use super::Subscriber;
use super::SubscriberBase;
use crate::constants::HEALTH_CHECKER_SUBJECT;

/// Pseudo-subscriber that removes subscribers reporting a terminal error
pub struct HealthChecker {
    base: SubscriberBase,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            base: SubscriberBase::new(
                NotifyType::HealthCheck,
                HEALTH_CHECKER_SUBJECT,
                HEALTH_CHECKER_SUBJECT,
            ),
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscriber for HealthChecker {
    fn base(&self) -> &SubscriberBase {
        &self.base
    }

    async fn on_message(
        &self,
        job: NotifyJob,
    ) {
        let JobPayload::SubscriberFailed {
            notify_type,
            subject,
            id,
            uid,
            message,
        } = job.payload
        else {
            return;
        };
        let Some(service) = self.base.service().and_then(|h| h.upgrade()) else {
            return;
        };

        warn!(
            notify_type = %notify_type,
            subject = %subject,
            id = %id,
            "remove failed subscriber: {}", message
        );
        service.remove_subscriber_by_uid(notify_type, &subject, &id, &uid);
    }
}
