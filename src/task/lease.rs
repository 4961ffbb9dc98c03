use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::AsyncTask;
use crate::constants::LEASE_TASK_KEY_PREFIX;
use crate::constants::SLOW_LEASE_RENEW_MS;
use crate::store::RemoteStore;
use crate::utils::backoff::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::StoreError;
use crate::TaskError;

/// Task key under which the renewals of one instance are serialized
pub fn lease_task_key(instance_key: &str) -> String {
    format!("{LEASE_TASK_KEY_PREFIX}{instance_key}")
}

#[derive(Debug, Default)]
struct Outcome {
    ttl: i64,
    err: Option<Arc<Error>>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

/// Renews one instance lease.
///
/// A lease the store no longer knows is not an error: the task succeeds with
/// a TTL of 0 and the caller decides whether the instance must register
/// again. Any other failure is retained as the task error.
pub struct LeaseRenewTask {
    key: String,
    instance_key: String,
    lease_id: i64,
    store: Arc<dyn RemoteStore>,
    policy: BackoffPolicy,
    created_at: Instant,
    outcome: Mutex<Outcome>,
}

impl std::fmt::Debug for LeaseRenewTask {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LeaseRenewTask")
            .field("key", &self.key)
            .field("lease_id", &self.lease_id)
            .field("outcome", &*self.outcome.lock())
            .finish()
    }
}

impl LeaseRenewTask {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        instance_key: impl Into<String>,
        lease_id: i64,
        policy: BackoffPolicy,
    ) -> Self {
        let instance_key = instance_key.into();
        Self {
            key: lease_task_key(&instance_key),
            instance_key,
            lease_id,
            store,
            policy,
            created_at: Instant::now(),
            outcome: Mutex::new(Outcome::default()),
        }
    }

    pub fn instance_key(&self) -> &str {
        &self.instance_key
    }

    pub fn lease_id(&self) -> i64 {
        self.lease_id
    }

    /// TTL returned by the last renewal; 0 if the lease was not found or the
    /// task has not run
    pub fn ttl(&self) -> i64 {
        self.outcome.lock().ttl
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.outcome.lock().started_at
    }

    pub fn finished_at(&self) -> Option<Instant> {
        self.outcome.lock().finished_at
    }

    /// Time spent queued before the renewal started
    pub fn queued_for(&self) -> Option<Duration> {
        self.started_at()
            .map(|started| started.duration_since(self.created_at))
    }
}

#[async_trait]
impl AsyncTask for LeaseRenewTask {
    fn key(&self) -> &str {
        &self.key
    }

    async fn execute(&self) -> Result<()> {
        let started = Instant::now();
        self.outcome.lock().started_at = Some(started);

        let lease_id = self.lease_id;
        let result = task_with_timeout_and_exponential_backoff(
            || self.store.lease_renew(lease_id),
            self.policy,
        )
        .await;

        let finished = Instant::now();
        let cost = finished.duration_since(started);
        if cost > Duration::from_millis(SLOW_LEASE_RENEW_MS) {
            warn!(
                instance = %self.instance_key,
                lease_id,
                cost = ?cost,
                "lease renewal is slow"
            );
        }

        let mut outcome = self.outcome.lock();
        outcome.finished_at = Some(finished);
        match result {
            Ok(ttl) => {
                debug!(instance = %self.instance_key, lease_id, ttl, "lease renewed");
                outcome.ttl = ttl;
                outcome.err = None;
                Ok(())
            }
            Err(Error::Store(StoreError::LeaseNotFound(_))) => {
                warn!(instance = %self.instance_key, lease_id, "lease not found");
                outcome.ttl = 0;
                outcome.err = None;
                Ok(())
            }
            Err(e) => {
                error!(
                    instance = %self.instance_key,
                    lease_id,
                    "renew lease failed: {}", e
                );
                let e = Arc::new(e);
                outcome.ttl = 0;
                outcome.err = Some(e.clone());
                // Store errors reach the caller unchanged
                let returned: Error = match e.as_ref() {
                    Error::Store(store_err) => store_err.clone().into(),
                    _ => TaskError::Failed {
                        key: self.key.clone(),
                        cause: e.clone(),
                    }
                    .into(),
                };
                Err(returned)
            }
        }
    }

    fn err(&self) -> Option<Arc<Error>> {
        self.outcome.lock().err.clone()
    }
}
