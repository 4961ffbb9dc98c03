use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::cache::CacheEvent;
use crate::cache::CacheEventHandler;
use crate::cache::EventType;
use crate::keys::instance_key;
use crate::notify::JobPayload;
use crate::notify::ListWatcher;
use crate::notify::NotifyService;
use crate::notify::NotifyType;
use crate::store::KeyValue;
use crate::NotifyConfig;
use crate::ServiceInstance;

fn instance_kv(
    key: &str,
    revision: i64,
) -> Arc<KeyValue<ServiceInstance>> {
    Arc::new(KeyValue {
        key: key.to_string(),
        value: ServiceInstance {
            instance_id: "inst1".to_string(),
            service_id: "svc1".to_string(),
            ..Default::default()
        },
        create_revision: revision,
        mod_revision: revision,
        version: 1,
        lease: 0,
    })
}

async fn setup() -> (
    NotifyService,
    InstanceEventHandler,
    tokio::sync::mpsc::Receiver<crate::notify::NotifyJob>,
) {
    let service = NotifyService::new(NotifyConfig::default());
    service.run();
    let (watcher, rx) = ListWatcher::new(
        NotifyType::Instance,
        "d/p/svc1",
        "w1",
        16,
        Duration::from_millis(100),
        None,
    );
    service.add_subscriber(watcher).unwrap();
    let handler = InstanceEventHandler::new(service.downgrade());
    (service, handler, rx)
}

#[tokio::test]
async fn test_watched_changes_reach_service_subject() {
    let (service, handler, mut rx) = setup().await;
    let key = instance_key("d/p", "svc1", "inst1");

    handler
        .on_event(CacheEvent::new(EventType::Create, instance_kv(&key, 7), 7))
        .await;
    handler
        .on_event(CacheEvent::new(EventType::Delete, instance_kv(&key, 7), 8))
        .await;

    for (expected_rev, expected_action) in [(7, EventType::Create), (8, EventType::Delete)] {
        let job = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(job.subject, "d/p/svc1");
        assert_eq!(job.revision, expected_rev);
        let JobPayload::Instance(change) = job.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(change.action, expected_action);
        assert_eq!(change.key, key);
        assert_eq!(change.instance.value.instance_id, "inst1");
    }
    service.stop().await;
}

#[tokio::test]
async fn test_init_and_error_events_are_not_published() {
    let (service, handler, mut rx) = setup().await;
    let key = instance_key("d/p", "svc1", "inst1");

    handler
        .on_event(CacheEvent::new(EventType::Init, instance_kv(&key, 3), 3))
        .await;
    handler.on_event(CacheEvent::error()).await;
    // Not an instance key
    handler
        .on_event(CacheEvent::new(
            EventType::Create,
            instance_kv("/cse-sr/inst/files/d/p/svc1", 4),
            4,
        ))
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    service.stop().await;
}

#[tokio::test]
async fn test_publish_failure_is_swallowed() {
    let service = NotifyService::new(NotifyConfig::default());
    let handler = InstanceEventHandler::new(service.downgrade());
    let key = instance_key("d/p", "svc1", "inst1");

    // Service never started: publish fails, the handler only logs
    handler
        .on_event(CacheEvent::new(EventType::Update, instance_kv(&key, 2), 2))
        .await;
    drop(service);
    handler
        .on_event(CacheEvent::new(EventType::Update, instance_kv(&key, 3), 3))
        .await;
}
