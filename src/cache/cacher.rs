use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ApplyOutcome;
use super::CacheEvent;
use super::CacheEventHandler;
use super::CacheReader;
use super::EventType;
use super::KvCache;
use super::Parser;
use super::PrefixListWatch;
use super::UNORDERED_REVISION;
use crate::metrics::CACHE_EVENTS_METRIC;
use crate::store::KeyValue;
use crate::store::RangeResponse;
use crate::store::RawKeyValue;
use crate::store::WatchEventKind;
use crate::store::WatchResponse;
use crate::utils::backoff::Backoff;
use crate::BackoffPolicy;
use crate::ReadySignal;
use crate::Result;
use crate::StoreError;

/// Keeps a [`KvCache`] in sync with one prefix of the remote store.
///
/// ```text
/// list ──► INIT events ──► watch(rev + 1) ──► CREATE / UPDATE / DELETE
///   ▲                                              │ error
///   └──── backoff ◄── ERROR event, rev := 0 ◄──────┘
/// ```
///
/// A relist after a failure is diffed against the cache, so keys that
/// changed or vanished while the watch was down still produce events.
pub struct KvCacher<V> {
    name: String,
    cache: Arc<KvCache<V>>,
    lw: PrefixListWatch,
    parser: Arc<dyn Parser<V>>,
    handlers: Vec<Arc<dyn CacheEventHandler<V>>>,
    retry: BackoffPolicy,
    ready: ReadySignal,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<V> KvCacher<V>
where
    V: Default + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        cache: Arc<KvCache<V>>,
        lw: PrefixListWatch,
        parser: Arc<dyn Parser<V>>,
        handlers: Vec<Arc<dyn CacheEventHandler<V>>>,
        retry: BackoffPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            cache,
            lw,
            parser,
            handlers,
            retry,
            ready: ReadySignal::new(),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<KvCache<V>> {
        &self.cache
    }

    /// Revision the cache is synced to, 0 when unknown
    pub fn revision(&self) -> i64 {
        self.lw.revision()
    }

    /// Starts the refresh loop. Calling `run` on a running cacher is a no-op.
    pub fn run(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let this = self.clone();
        *handle = Some(tokio::spawn(async move { this.refresh_loop().await }));
    }

    /// Stops the refresh loop and waits for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(name = %self.name, "cacher worker join failed: {:?}", e);
            }
        }
        self.ready.fire();
    }

    /// Resolves after the first successful list, or on stop
    pub async fn ready(&self) {
        self.ready.wait().await
    }

    pub fn ready_signal(&self) -> &ReadySignal {
        &self.ready
    }

    async fn refresh_loop(self: Arc<Self>) {
        info!(name = %self.name, prefix = %self.lw.prefix(), "cacher started");
        let mut backoff = Backoff::new(self.retry);
        let mut initialized = false;

        while !self.shutdown.is_cancelled() {
            let err = match self.list_and_watch(&mut initialized, &mut backoff).await {
                Ok(()) => break,
                Err(e) => e,
            };

            error!(
                name = %self.name,
                revision = self.lw.revision(),
                "list/watch failed, relisting: {}", err
            );
            self.lw.reset();
            self.cache.mark_dirty();
            self.emit(CacheEvent::error()).await;

            let delay = backoff.next_delay().unwrap_or_else(|| self.retry.timeout());
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.ready.fire();
        info!(name = %self.name, "cacher stopped");
    }

    /// Returns `Ok` only on shutdown; every failure is an `Err`.
    async fn list_and_watch(
        &self,
        initialized: &mut bool,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let resp = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            resp = self.lw.list() => resp?,
        };

        if *initialized {
            self.apply_relist(resp).await;
        } else {
            self.apply_initial_list(resp).await;
            *initialized = true;
        }
        self.cache.clear_dirty();
        backoff.reset();
        self.ready.fire();

        let mut stream = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            stream = self.lw.watch() => stream?,
        };

        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                item = stream.next() => item,
            };
            match item {
                None => return Err(StoreError::WatchClosed.into()),
                Some(Err(e)) => return Err(e),
                Some(Ok(batch)) => self.apply_watch(batch).await,
            }
        }
    }

    fn parse(
        &self,
        raw: &RawKeyValue,
    ) -> Option<Arc<KeyValue<V>>> {
        match self.parser.parse(&raw.key, &raw.value) {
            Ok(value) => Some(Arc::new(raw.with_value(value))),
            Err(e) => {
                error!(name = %self.name, key = %raw.key, "skip unparsable value: {}", e);
                None
            }
        }
    }

    async fn apply_initial_list(
        &self,
        resp: RangeResponse,
    ) {
        let revision = resp.revision;
        for raw in &resp.kvs {
            let Some(kv) = self.parse(raw) else {
                continue;
            };
            if !matches!(self.cache.put(kv.clone()), ApplyOutcome::Stale) {
                self.emit(CacheEvent::new(EventType::Init, kv, revision)).await;
            }
        }
        info!(name = %self.name, revision, count = self.cache.size(), "cache initialized");
    }

    /// Diffs a fresh list against the cache. Creations and updates carry the
    /// mod revision of their record and are emitted in that order; deletions
    /// carry [`UNORDERED_REVISION`] since the store no longer knows when they
    /// happened.
    async fn apply_relist(
        &self,
        resp: RangeResponse,
    ) {
        let revision = resp.revision;
        let mut listed = HashSet::with_capacity(resp.kvs.len());
        let mut changed = Vec::new();
        for raw in &resp.kvs {
            listed.insert(raw.key.clone());
            let Some(kv) = self.parse(raw) else {
                continue;
            };
            match self.cache.put(kv.clone()) {
                ApplyOutcome::Created => changed.push((EventType::Create, kv)),
                ApplyOutcome::Updated => changed.push((EventType::Update, kv)),
                _ => {}
            }
        }

        changed.sort_by_key(|(_, kv)| kv.mod_revision);
        for (event_type, kv) in changed {
            let mod_revision = kv.mod_revision;
            self.emit(CacheEvent::new(event_type, kv, mod_revision)).await;
        }

        for key in self.cache.keys() {
            if listed.contains(&key) {
                continue;
            }
            if let ApplyOutcome::Removed(prev) = self.cache.remove(&key, revision) {
                self.emit(CacheEvent::new(EventType::Delete, prev, UNORDERED_REVISION))
                    .await;
            }
        }
        info!(name = %self.name, revision, count = self.cache.size(), "cache resynced");
    }

    async fn apply_watch(
        &self,
        batch: WatchResponse,
    ) {
        for event in &batch.events {
            match event.kind {
                WatchEventKind::Put => {
                    let Some(kv) = self.parse(&event.kv) else {
                        continue;
                    };
                    let revision = kv.mod_revision;
                    let event_type = match self.cache.put(kv.clone()) {
                        ApplyOutcome::Created => EventType::Create,
                        ApplyOutcome::Updated => EventType::Update,
                        _ => continue,
                    };
                    self.emit(CacheEvent::new(event_type, kv, revision)).await;
                }
                WatchEventKind::Delete => {
                    let revision = event.kv.mod_revision;
                    match self.cache.remove(&event.kv.key, revision) {
                        ApplyOutcome::Removed(prev) => {
                            self.emit(CacheEvent::new(EventType::Delete, prev, revision))
                                .await;
                        }
                        ApplyOutcome::Missing => {
                            debug!(name = %self.name, key = %event.kv.key, "delete of uncached key");
                        }
                        _ => {
                            warn!(name = %self.name, key = %event.kv.key, revision, "stale delete ignored");
                        }
                    }
                }
            }
        }
        self.lw.set_revision(batch.revision);
    }

    async fn emit(
        &self,
        event: CacheEvent<V>,
    ) {
        CACHE_EVENTS_METRIC
            .with_label_values(&[&self.name, event.event_type.as_str()])
            .inc();
        for handler in &self.handlers {
            handler.on_event(event.clone()).await;
        }
    }
}
