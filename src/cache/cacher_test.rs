use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;
use crate::store::MemStore;
use crate::store::RemoteStore;
use crate::BackoffPolicy;

struct ChannelHandler<V> {
    tx: mpsc::UnboundedSender<CacheEvent<V>>,
}

#[async_trait]
impl<V: Send + Sync + 'static> CacheEventHandler<V> for ChannelHandler<V> {
    async fn on_event(
        &self,
        event: CacheEvent<V>,
    ) {
        let _ = self.tx.send(event);
    }
}

fn fast_retry() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 1000,
        base_delay_ms: 10,
        max_delay_ms: 50,
    }
}

fn setup(
    store: Arc<MemStore>,
    prefix: &str,
) -> (
    Arc<KvCacher<Bytes>>,
    mpsc::UnboundedReceiver<CacheEvent<Bytes>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cache = Arc::new(KvCache::new("test", prefix, 16));
    let lw = PrefixListWatch::new(store, prefix, Duration::from_secs(1));
    let cacher = Arc::new(KvCacher::new(
        "test",
        cache,
        lw,
        Arc::new(BytesParser),
        vec![Arc::new(ChannelHandler { tx })],
        fast_retry(),
    ));
    (cacher, rx)
}

async fn next_event<V>(rx: &mut mpsc::UnboundedReceiver<CacheEvent<V>>) -> CacheEvent<V> {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout waiting for cache event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_initial_list_emits_init_events_and_fires_ready() {
    let store = Arc::new(MemStore::new());
    store.put("/svc/1", Bytes::from("v1"), 0).await.unwrap();
    store.put("/svc/2", Bytes::from("v2"), 0).await.unwrap();
    store.put("/other/1", Bytes::from("x"), 0).await.unwrap();

    let (cacher, mut rx) = setup(store.clone(), "/svc/");
    cacher.run();
    timeout(Duration::from_secs(2), cacher.ready()).await.unwrap();

    let mut keys = vec![next_event(&mut rx).await, next_event(&mut rx).await]
        .into_iter()
        .map(|e| {
            assert_eq!(e.event_type, EventType::Init);
            assert_eq!(e.revision, 3);
            e.key
        })
        .collect::<Vec<_>>();
    keys.sort();
    assert_eq!(keys, vec!["/svc/1", "/svc/2"]);
    assert_eq!(cacher.cache().size(), 2);
    assert_eq!(cacher.revision(), 3);

    cacher.stop().await;
}

#[tokio::test]
async fn test_watch_applies_create_update_delete_in_order() {
    let store = Arc::new(MemStore::new());
    let (cacher, mut rx) = setup(store.clone(), "/svc/");
    cacher.run();
    cacher.ready().await;
    // Give the refresher time to open its watch after the empty list
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.put("/svc/1", Bytes::from("v1"), 0).await.unwrap();
    store.put("/svc/1", Bytes::from("v2"), 0).await.unwrap();
    let del_rev = store.delete("/svc/1").await.unwrap();

    let created = next_event(&mut rx).await;
    assert_eq!(created.event_type, EventType::Create);
    let updated = next_event(&mut rx).await;
    assert_eq!(updated.event_type, EventType::Update);
    assert_eq!(updated.kv.as_ref().unwrap().value, Bytes::from("v2"));
    let deleted = next_event(&mut rx).await;
    assert_eq!(deleted.event_type, EventType::Delete);
    assert_eq!(deleted.revision, del_rev);
    // Delete carries the removed entry
    assert_eq!(deleted.kv.as_ref().unwrap().value, Bytes::from("v2"));

    assert_eq!(cacher.cache().size(), 0);
    assert_eq!(cacher.revision(), del_rev);
    cacher.stop().await;
}

#[tokio::test]
async fn test_broken_watch_emits_error_and_relist_diffs_cache() {
    let store = Arc::new(MemStore::new());
    store.put("/svc/keep", Bytes::from("k"), 0).await.unwrap();
    store.put("/svc/gone", Bytes::from("g"), 0).await.unwrap();
    store.put("/svc/changed", Bytes::from("c1"), 0).await.unwrap();

    let (cacher, mut rx) = setup(store.clone(), "/svc/");
    cacher.run();
    cacher.ready().await;
    for _ in 0..3 {
        assert_eq!(next_event(&mut rx).await.event_type, EventType::Init);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.break_watches();
    store.delete("/svc/gone").await.unwrap();
    store.put("/svc/changed", Bytes::from("c2"), 0).await.unwrap();
    store.put("/svc/new", Bytes::from("n"), 0).await.unwrap();

    let err = next_event(&mut rx).await;
    assert_eq!(err.event_type, EventType::Error);
    assert!(err.kv.is_none());

    let mut diff = Vec::new();
    for _ in 0..3 {
        let e = next_event(&mut rx).await;
        diff.push((e.event_type, e.key));
    }
    diff.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        diff,
        vec![
            (EventType::Update, "/svc/changed".to_string()),
            (EventType::Delete, "/svc/gone".to_string()),
            (EventType::Create, "/svc/new".to_string()),
        ]
    );

    let cache = cacher.cache();
    assert!(!cache.dirty());
    assert!(cache.have("/svc/keep"));
    assert!(!cache.have("/svc/gone"));
    assert_eq!(cache.get("/svc/changed").unwrap().value, Bytes::from("c2"));
    assert_eq!(cacher.revision(), store.revision());
    cacher.stop().await;
}

#[tokio::test]
async fn test_relist_events_carry_record_revisions() {
    let store = Arc::new(MemStore::new());
    store.put("/svc/a", Bytes::from("a1"), 0).await.unwrap();
    store.put("/svc/b", Bytes::from("b1"), 0).await.unwrap();
    store.put("/svc/gone", Bytes::from("g"), 0).await.unwrap();

    let (cacher, mut rx) = setup(store.clone(), "/svc/");
    cacher.run();
    cacher.ready().await;
    for _ in 0..3 {
        assert_eq!(next_event(&mut rx).await.event_type, EventType::Init);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    store.break_watches();
    // Written out of key order while no watch is open
    let rev_b = store.put("/svc/b", Bytes::from("b2"), 0).await.unwrap();
    let rev_a = store.put("/svc/a", Bytes::from("a2"), 0).await.unwrap();
    store.delete("/svc/gone").await.unwrap();

    assert_eq!(next_event(&mut rx).await.event_type, EventType::Error);
    let mut diff = Vec::new();
    for _ in 0..3 {
        let e = next_event(&mut rx).await;
        diff.push((e.event_type, e.key, e.revision));
    }
    assert_eq!(
        diff,
        vec![
            (EventType::Update, "/svc/b".to_string(), rev_b),
            (EventType::Update, "/svc/a".to_string(), rev_a),
            (EventType::Delete, "/svc/gone".to_string(), UNORDERED_REVISION),
        ]
    );
    cacher.stop().await;
}

#[tokio::test]
async fn test_unavailable_store_retries_until_first_list_succeeds() {
    let store = Arc::new(MemStore::new());
    store.put("/svc/1", Bytes::from("v1"), 0).await.unwrap();
    store.set_unavailable(true);

    let (cacher, mut rx) = setup(store.clone(), "/svc/");
    cacher.run();

    assert_eq!(next_event(&mut rx).await.event_type, EventType::Error);
    assert!(cacher.cache().dirty());
    assert_eq!(cacher.revision(), 0);

    store.set_unavailable(false);
    timeout(Duration::from_secs(2), cacher.ready()).await.unwrap();

    // Errors may repeat before recovery; the first data event is still INIT
    let event = loop {
        let event = next_event(&mut rx).await;
        if event.event_type != EventType::Error {
            break event;
        }
    };
    assert_eq!(event.event_type, EventType::Init);
    assert_eq!(event.key, "/svc/1");
    cacher.stop().await;
}

#[tokio::test]
async fn test_unparsable_values_are_skipped() {
    let store = Arc::new(MemStore::new());
    store.put("/rules/ok", Bytes::from(r#"{"ruleId":"r1"}"#), 0).await.unwrap();
    store.put("/rules/bad", Bytes::from("not json"), 0).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cacher = Arc::new(KvCacher::new(
        "rules",
        Arc::new(KvCache::new("rules", "/rules/", 16)),
        PrefixListWatch::new(store.clone(), "/rules/", Duration::from_secs(1)),
        Arc::new(JsonParser::<crate::Rule>::new()),
        vec![Arc::new(ChannelHandler { tx })],
        fast_retry(),
    ));
    cacher.run();
    cacher.ready().await;

    let event = next_event(&mut rx).await;
    assert_eq!(event.key, "/rules/ok");
    assert_eq!(event.kv.unwrap().value.rule_id, "r1");
    assert_eq!(cacher.cache().size(), 1);
    cacher.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_releases_ready() {
    let store = Arc::new(MemStore::new());
    store.set_unavailable(true);
    let (cacher, _rx) = setup(store, "/svc/");
    cacher.run();

    cacher.stop().await;
    cacher.stop().await;
    timeout(Duration::from_millis(100), cacher.ready())
        .await
        .expect("stop releases ready");

    // Run after stop does not restart the loop
    cacher.run();
    assert_eq!(cacher.revision(), 0);
}
