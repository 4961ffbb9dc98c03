//! Owning context of the registry core.
//!
//! [`RegistryCore`] builds and wires every long-lived component: one cache
//! indexer per collection, the lease task service and the notify service.
//! Instance changes seen by the instance indexer are published to watchers of
//! the owning service.

use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cache::BytesParser;
use crate::cache::CacheEventHandler;
use crate::cache::CacheIndexer;
use crate::cache::CacheOptions;
use crate::cache::EventType;
use crate::cache::JsonParser;
use crate::cache::SearchOptions;
use crate::constants::INSTANCE_COLLECTION;
use crate::constants::INSTANCE_ROOT_KEY;
use crate::constants::RULE_COLLECTION;
use crate::constants::RULE_ROOT_KEY;
use crate::constants::SCHEMA_COLLECTION;
use crate::constants::SCHEMA_ROOT_KEY;
use crate::constants::SERVICE_COLLECTION;
use crate::constants::SERVICE_ROOT_KEY;
use crate::event::InstanceEventHandler;
use crate::keys::instance_root_key;
use crate::notify::InstanceChange;
use crate::notify::JobPayload;
use crate::notify::ListFn;
use crate::notify::ListFuture;
use crate::notify::ListWatcher;
use crate::notify::NotifyJob;
use crate::notify::NotifyService;
use crate::notify::NotifyType;
use crate::store::RemoteStore;
use crate::task::lease_task_key;
use crate::task::AsyncTask;
use crate::task::AsyncTaskService;
use crate::task::LeaseRenewTask;
use crate::MicroService;
use crate::RegistryConfig;
use crate::Result;
use crate::Rule;
use crate::ServiceInstance;
use crate::StoreError;

pub struct RegistryCore {
    config: RegistryConfig,
    store: Arc<dyn RemoteStore>,
    services: Arc<CacheIndexer<MicroService>>,
    instances: Arc<CacheIndexer<ServiceInstance>>,
    rules: Arc<CacheIndexer<Rule>>,
    schemas: Arc<CacheIndexer<Bytes>>,
    tasks: Arc<AsyncTaskService<LeaseRenewTask>>,
    notify: NotifyService,
}

impl RegistryCore {
    /// Validates `config` and constructs every component. Nothing is started
    /// until [`run`](Self::run).
    pub fn build(
        config: RegistryConfig,
        store: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let notify = NotifyService::new(config.notify.clone());
        let instance_handler: Arc<dyn CacheEventHandler<ServiceInstance>> =
            Arc::new(InstanceEventHandler::new(notify.downgrade()));

        let services = Arc::new(CacheIndexer::new(
            CacheOptions {
                name: SERVICE_COLLECTION.to_string(),
                prefix: SERVICE_ROOT_KEY.to_string(),
                parser: Arc::new(JsonParser::<MicroService>::new()),
                handlers: Vec::new(),
            },
            config.cache.clone(),
            config.retry.relist,
            store.clone(),
        ));
        let instances = Arc::new(CacheIndexer::new(
            CacheOptions {
                name: INSTANCE_COLLECTION.to_string(),
                prefix: INSTANCE_ROOT_KEY.to_string(),
                parser: Arc::new(JsonParser::<ServiceInstance>::new()),
                handlers: vec![instance_handler],
            },
            config.cache.clone(),
            config.retry.relist,
            store.clone(),
        ));
        let rules = Arc::new(CacheIndexer::new(
            CacheOptions {
                name: RULE_COLLECTION.to_string(),
                prefix: RULE_ROOT_KEY.to_string(),
                parser: Arc::new(JsonParser::<Rule>::new()),
                handlers: Vec::new(),
            },
            config.cache.clone(),
            config.retry.relist,
            store.clone(),
        ));
        let schemas = Arc::new(CacheIndexer::new(
            CacheOptions {
                name: SCHEMA_COLLECTION.to_string(),
                prefix: SCHEMA_ROOT_KEY.to_string(),
                parser: Arc::new(BytesParser),
                handlers: Vec::new(),
            },
            config.cache.clone(),
            config.retry.relist,
            store.clone(),
        ));
        let tasks = Arc::new(AsyncTaskService::new(config.task.clone()));

        debug!(?config, "registry core built");
        Ok(Self {
            config,
            store,
            services,
            instances,
            rules,
            schemas,
            tasks,
            notify,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn services(&self) -> &Arc<CacheIndexer<MicroService>> {
        &self.services
    }

    pub fn instances(&self) -> &Arc<CacheIndexer<ServiceInstance>> {
        &self.instances
    }

    pub fn rules(&self) -> &Arc<CacheIndexer<Rule>> {
        &self.rules
    }

    pub fn schemas(&self) -> &Arc<CacheIndexer<Bytes>> {
        &self.schemas
    }

    pub fn tasks(&self) -> &Arc<AsyncTaskService<LeaseRenewTask>> {
        &self.tasks
    }

    pub fn notify(&self) -> &NotifyService {
        &self.notify
    }

    /// Starts every component. Notify runs first so that no instance change
    /// observed by the first list is published into a closed service.
    pub fn run(&self) {
        self.notify.run();
        self.tasks.run();
        self.services.run();
        self.instances.run();
        self.rules.run();
        self.schemas.run();
        info!("registry core started");
    }

    /// Stops producers before consumers. Idempotent.
    pub async fn stop(&self) {
        self.services.stop().await;
        self.instances.stop().await;
        self.rules.stop().await;
        self.schemas.stop().await;
        self.tasks.stop().await;
        self.notify.stop().await;
        info!("registry core stopped");
    }

    /// Resolves once every collection has been listed and the background
    /// services are running, or once the core has been stopped.
    pub async fn ready(&self) {
        self.notify.ready().await;
        self.tasks.ready().await;
        self.services.ready().await;
        self.instances.ready().await;
        self.rules.ready().await;
        self.schemas.ready().await;
    }

    /// Renews the lease of an instance and returns its TTL in seconds.
    ///
    /// Renewals of one instance are serialized: the first one runs inline,
    /// later ones are queued and the TTL of the latest finished renewal is
    /// returned. A lease the store no longer knows is reported as
    /// `StoreError::LeaseNotFound`. Returns 0 while the very first renewal of
    /// the instance is still in flight on another caller.
    pub async fn heartbeat(
        &self,
        instance_key: &str,
        lease_id: i64,
    ) -> Result<i64> {
        let task = Arc::new(LeaseRenewTask::new(
            self.store.clone(),
            instance_key,
            lease_id,
            self.config.retry.lease_renew,
        ));
        let key = task.key().to_string();
        self.tasks.add(task).await?;

        let latest = self.tasks.latest_handled(&key)?;
        if latest.finished_at().is_none() {
            return Ok(0);
        }
        match latest.ttl() {
            0 => {
                warn!(instance_key = %instance_key, lease_id = latest.lease_id(), "heartbeat on a missing lease");
                Err(StoreError::LeaseNotFound(latest.lease_id()).into())
            }
            ttl => Ok(ttl),
        }
    }

    /// Releases the lease scheduler of an instance on the next reclamation tick
    pub fn deregister(
        &self,
        instance_key: &str,
    ) -> Result<()> {
        self.tasks.defer_remove(&lease_task_key(instance_key))
    }

    /// Registers a watcher for every instance of one service.
    ///
    /// The watcher first receives the instances currently known to the
    /// instance indexer, then every later change with a newer revision.
    pub fn watch_instances(
        &self,
        domain_project: &str,
        service_id: &str,
        subscriber_id: &str,
    ) -> Result<(Arc<ListWatcher>, mpsc::Receiver<NotifyJob>)> {
        let prefix = instance_root_key(domain_project, service_id);
        let indexer = self.instances.clone();
        let list_fn: ListFn = Box::new(move || -> ListFuture {
            async move {
                // Read before the search: a change racing the list is then
                // delivered again rather than lost
                let revision = indexer.revision();
                let resp = indexer.search(SearchOptions::with_prefix(prefix)).await?;
                let payloads: Vec<JobPayload> = resp
                    .kvs
                    .into_iter()
                    .map(|kv| {
                        JobPayload::Instance(InstanceChange {
                            action: EventType::Init,
                            key: kv.key.clone(),
                            instance: kv,
                        })
                    })
                    .collect();
                Ok((payloads, revision))
            }
            .boxed()
        });

        let (watcher, rx) = ListWatcher::new(
            NotifyType::Instance,
            format!("{domain_project}/{service_id}"),
            subscriber_id,
            self.config.notify.subscriber_buffer_size,
            self.config.notify.notify_timeout(),
            Some(list_fn),
        );
        self.notify.add_subscriber(watcher.clone())?;
        debug!(
            domain_project = %domain_project,
            service_id = %service_id,
            subscriber_id = %subscriber_id,
            "instance watcher added"
        );
        Ok((watcher, rx))
    }
}
