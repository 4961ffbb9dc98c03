//! Cache-backed query front for one collection.
//!
//! [`CacheIndexer`] owns a collection's cache, its watch refresher and a
//! [`PrefixIndex`] kept current by a single build worker. Searches are served
//! from the cache when the query allows it and fall back to the remote store
//! otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use autometrics::autometrics;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;

use super::CacheEvent;
use super::CacheEventHandler;
use super::CacheReader;
use super::CompactionGate;
use super::EventType;
use super::KvCache;
use super::KvCacher;
use super::Parser;
use super::PrefixIndex;
use super::PrefixListWatch;
use crate::metrics::record_drop;
use crate::metrics::CACHE_ENTRIES_METRIC;
use crate::metrics::PREFIX_INDEX_NODES_METRIC;
use crate::store::KeyValue;
use crate::store::RangeRequest;
use crate::store::RemoteStore;
use crate::BackoffPolicy;
use crate::CacheConfig;
use crate::CacheError;
use crate::Result;
use crate::API_SLO;

/// Where a search may be answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Cache first, remote store when the cache has nothing
    #[default]
    Both,
    /// Never touch the remote store
    CacheOnly,
    /// Always ask the remote store
    NoCache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub key: String,
    pub prefix: bool,
    pub count_only: bool,
    pub key_only: bool,
    /// Non-zero pins the read to a store revision
    pub revision: i64,
    /// Pagination is requested when `offset >= 0 && limit > 0`
    pub offset: i64,
    pub limit: i64,
    pub mode: CacheMode,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            key: String::new(),
            prefix: false,
            count_only: false,
            key_only: false,
            revision: 0,
            offset: -1,
            limit: 0,
            mode: CacheMode::Both,
        }
    }
}

impl SearchOptions {
    pub fn point(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            prefix: true,
            ..Default::default()
        }
    }

    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    pub fn mode(
        mut self,
        mode: CacheMode,
    ) -> Self {
        self.mode = mode;
        self
    }

    fn paginated(&self) -> bool {
        self.offset >= 0 && self.limit > 0
    }

    fn to_range_request(&self) -> RangeRequest {
        RangeRequest {
            key: self.key.clone(),
            prefix: self.prefix,
            count_only: self.count_only,
            key_only: self.key_only,
            revision: self.revision,
            offset: self.offset,
            limit: self.limit,
        }
    }
}

#[derive(Debug)]
pub struct SearchResponse<V> {
    pub count: i64,
    pub kvs: Vec<Arc<KeyValue<V>>>,
}

impl<V> Default for SearchResponse<V> {
    fn default() -> Self {
        Self {
            count: 0,
            kvs: Vec::new(),
        }
    }
}

/// Construction parameters of one collection
pub struct CacheOptions<V> {
    /// Collection name, used in logs and metric labels
    pub name: String,
    /// Key prefix the collection mirrors; must end with `/`
    pub prefix: String,
    pub parser: Arc<dyn Parser<V>>,
    /// Extra consumers of the collection's events, called after the index
    pub handlers: Vec<Arc<dyn CacheEventHandler<V>>>,
}

/// Feeds index-relevant events into the bounded build queue.
///
/// Waits up to `timeout` for room; on expiry the event is dropped and the
/// index may lag the cache until a later event touches the same subtree.
pub(crate) struct PrefixBuildHandler<V> {
    pub(crate) name: String,
    pub(crate) tx: mpsc::Sender<CacheEvent<V>>,
    pub(crate) timeout: std::time::Duration,
}

#[async_trait]
impl<V> CacheEventHandler<V> for PrefixBuildHandler<V>
where
    V: Send + Sync + 'static,
{
    async fn on_event(
        &self,
        event: CacheEvent<V>,
    ) {
        if !matches!(
            event.event_type,
            EventType::Init | EventType::Create | EventType::Delete
        ) {
            return;
        }

        if let Err(e) = self.tx.send_timeout(event, self.timeout).await {
            let (reason, event) = match e {
                SendTimeoutError::Timeout(event) => ("timeout", event),
                SendTimeoutError::Closed(event) => ("closed", event),
            };
            error!(
                name = %self.name,
                key = %event.key,
                event_type = %event.event_type,
                "prefix build queue {}, event dropped", reason
            );
            record_drop("prefix_build", &self.name);
        }
    }
}

pub struct CacheIndexer<V> {
    name: String,
    prefix: String,
    config: CacheConfig,
    store: Arc<dyn RemoteStore>,
    parser: Arc<dyn Parser<V>>,
    cacher: Arc<KvCacher<V>>,
    index: Arc<RwLock<PrefixIndex>>,
    build_rx: Mutex<Option<mpsc::Receiver<CacheEvent<V>>>>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<V> CacheIndexer<V>
where
    V: Default + Send + Sync + 'static,
{
    pub fn new(
        options: CacheOptions<V>,
        config: CacheConfig,
        retry: BackoffPolicy,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        let CacheOptions {
            name,
            prefix,
            parser,
            handlers,
        } = options;

        let (tx, rx) = mpsc::channel(config.build_queue_size);
        let mut all_handlers: Vec<Arc<dyn CacheEventHandler<V>>> =
            Vec::with_capacity(handlers.len() + 1);
        all_handlers.push(Arc::new(PrefixBuildHandler {
            name: name.clone(),
            tx,
            timeout: config.build_queue_timeout(),
        }));
        all_handlers.extend(handlers);

        let cache = Arc::new(KvCache::new(name.clone(), prefix.clone(), config.init_size));
        let lw = PrefixListWatch::new(store.clone(), prefix.clone(), config.list_timeout());
        let cacher = Arc::new(KvCacher::new(
            name.clone(),
            cache,
            lw,
            parser.clone(),
            all_handlers,
            retry,
        ));

        Self {
            index: Arc::new(RwLock::new(PrefixIndex::new(prefix.clone(), config.init_size))),
            name,
            prefix,
            config,
            store,
            parser,
            cacher,
            build_rx: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn cache(&self) -> Arc<dyn CacheReader<V>> {
        self.cacher.cache().clone()
    }

    /// Revision the cache is synced to, 0 when unknown
    pub fn revision(&self) -> i64 {
        self.cacher.revision()
    }

    /// Starts the build worker, the metrics reporter and the refresher.
    /// Calling `run` twice is a no-op.
    ///
    /// The refresher runs even when caching is disabled: it is the only
    /// source of change events for handlers.
    pub fn run(&self) {
        let Some(rx) = self.build_rx.lock().take() else {
            return;
        };

        let mut handles = self.handles.lock();
        handles.push(tokio::spawn(build_worker(
            self.name.clone(),
            self.index.clone(),
            rx,
            CompactionGate::new(
                self.config.init_size,
                self.config.compact_times,
                self.config.compact_interval(),
            ),
            self.shutdown.clone(),
        )));
        handles.push(tokio::spawn(metrics_worker(
            self.name.clone(),
            self.cacher.cache().clone(),
            self.index.clone(),
            self.config.metrics_interval(),
            self.shutdown.clone(),
        )));
        self.cacher.run();
        info!(name = %self.name, prefix = %self.prefix, "cache indexer started");
    }

    /// Stops every worker and waits for them. Idempotent.
    pub async fn stop(&self) {
        self.cacher.stop().await;
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(name = %self.name, "indexer worker join failed: {:?}", e);
            }
        }
        debug!(name = %self.name, "cache indexer stopped");
    }

    /// Resolves once the first full list has been applied, or on stop
    pub async fn ready(&self) {
        self.cacher.ready().await
    }

    /// Prefix index node count
    pub fn index_len(&self) -> usize {
        self.index.read().len()
    }

    /// Answers a point, prefix or count query.
    ///
    /// Routing, in order:
    /// 1. caching disabled, `NoCache`, a pinned revision or pagination: remote store only
    /// 2. prefix: keys from the index, or the remote store when the index has none
    /// 3. point: the cached entry, or the remote store when it is missing
    ///
    /// `CacheOnly` turns every remote fallback into an empty result.
    /// Remote store errors are returned unchanged.
    #[autometrics(objective = API_SLO)]
    pub async fn search(
        &self,
        opts: SearchOptions,
    ) -> Result<SearchResponse<V>> {
        self.check_prefix(&opts.key)?;

        if !self.config.enabled
            || opts.mode == CacheMode::NoCache
            || opts.revision > 0
            || opts.paginated()
        {
            return self.search_by_backend(&opts).await;
        }

        let resp = if opts.prefix {
            self.search_prefix_with_cache(&opts)
        } else {
            self.search_point_with_cache(&opts)
        };
        if resp.count > 0 || opts.mode == CacheMode::CacheOnly {
            return Ok(resp);
        }

        trace!(name = %self.name, key = %opts.key, "cache miss, falling back to remote store");
        self.search_by_backend(&opts).await
    }

    fn check_prefix(
        &self,
        key: &str,
    ) -> Result<()> {
        if !key.starts_with(&self.prefix) {
            return Err(CacheError::PrefixMismatch {
                key: key.to_string(),
                prefix: self.prefix.clone(),
            }
            .into());
        }
        Ok(())
    }

    fn search_prefix_with_cache(
        &self,
        opts: &SearchOptions,
    ) -> SearchResponse<V> {
        let keys = self.index.read().get_keys(&opts.key);
        if opts.count_only {
            return SearchResponse {
                count: keys.len() as i64,
                kvs: Vec::new(),
            };
        }

        let cache = self.cacher.cache();
        let kvs: Vec<Arc<KeyValue<V>>> = keys.iter().filter_map(|key| cache.get(key)).collect();
        SearchResponse {
            count: kvs.len() as i64,
            kvs,
        }
    }

    fn search_point_with_cache(
        &self,
        opts: &SearchOptions,
    ) -> SearchResponse<V> {
        let cache = self.cacher.cache();
        if opts.count_only {
            return SearchResponse {
                count: i64::from(cache.have(&opts.key)),
                kvs: Vec::new(),
            };
        }

        match cache.get(&opts.key) {
            Some(kv) => SearchResponse {
                count: 1,
                kvs: vec![kv],
            },
            None => SearchResponse::default(),
        }
    }

    async fn search_by_backend(
        &self,
        opts: &SearchOptions,
    ) -> Result<SearchResponse<V>> {
        let resp = self.store.range(opts.to_range_request()).await?;

        // An unparsable record is left out rather than failing the query
        let mut kvs = Vec::with_capacity(resp.kvs.len());
        let mut skipped = 0;
        for raw in &resp.kvs {
            let value = if opts.key_only {
                V::default()
            } else {
                match self.parser.parse(&raw.key, &raw.value) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(name = %self.name, key = %raw.key, "skip unparsable value: {}", e);
                        skipped += 1;
                        continue;
                    }
                }
            };
            kvs.push(Arc::new(raw.with_value(value)));
        }
        Ok(SearchResponse {
            count: (resp.count - skipped).max(0),
            kvs,
        })
    }
}

async fn build_worker<V>(
    name: String,
    index: Arc<RwLock<PrefixIndex>>,
    mut rx: mpsc::Receiver<CacheEvent<V>>,
    mut gate: CompactionGate,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let len = {
            let mut index = index.write();
            match event.event_type {
                EventType::Init | EventType::Create => index.add_key(&event.key),
                EventType::Delete => index.delete_key(&event.key),
                EventType::Update | EventType::Error => {}
            }
            index.len()
        };

        let now = Instant::now();
        if gate.observe(len, now) {
            let len = {
                let mut index = index.write();
                index.compact();
                index.len()
            };
            gate.compacted(len, now);
            info!(name = %name, nodes = len, "prefix index compacted");
        }
    }
    debug!(name = %name, "prefix build worker stopped");
}

async fn metrics_worker<V>(
    name: String,
    cache: Arc<KvCache<V>>,
    index: Arc<RwLock<PrefixIndex>>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) where
    V: Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                CACHE_ENTRIES_METRIC
                    .with_label_values(&[&name])
                    .set(cache.size() as i64);
                PREFIX_INDEX_NODES_METRIC
                    .with_label_values(&[&name])
                    .set(index.read().len() as i64);
            }
        }
    }
}
