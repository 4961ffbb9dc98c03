use async_trait::async_trait;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::cache::CacheEvent;
use crate::cache::CacheEventHandler;
use crate::cache::EventType;
use crate::keys::parse_instance_key;
use crate::notify::InstanceChange;
use crate::notify::NotifyHandle;
use crate::notify::NotifyJob;
use crate::ServiceInstance;

/// Publishes instance changes to the watchers of the owning service.
///
/// Only watched changes are published. INIT events come from a full list
/// that watchers already receive through their own initial list, and ERROR
/// events carry no instance.
pub struct InstanceEventHandler {
    notify: NotifyHandle,
}

impl InstanceEventHandler {
    pub fn new(notify: NotifyHandle) -> Self {
        Self { notify }
    }
}

#[async_trait]
impl CacheEventHandler<ServiceInstance> for InstanceEventHandler {
    async fn on_event(
        &self,
        event: CacheEvent<ServiceInstance>,
    ) {
        if !matches!(
            event.event_type,
            EventType::Create | EventType::Update | EventType::Delete
        ) {
            return;
        }
        let Some(kv) = event.kv else {
            return;
        };
        let Some(parsed) = parse_instance_key(&event.key) else {
            debug!(key = %event.key, "not an instance key, skip notify");
            return;
        };

        let job = NotifyJob::instance(
            parsed.subject(),
            event.revision,
            InstanceChange {
                action: event.event_type,
                key: event.key.clone(),
                instance: kv,
            },
        );
        trace!(key = %event.key, action = %event.event_type, revision = event.revision, "publish instance change");
        if let Err(e) = self.notify.publish(job).await {
            error!(
                key = %event.key,
                action = %event.event_type,
                revision = event.revision,
                "publish instance change failed: {}", e
            );
        }
    }
}
