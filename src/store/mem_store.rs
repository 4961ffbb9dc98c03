use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::KeyValue;
use super::RangeRequest;
use super::RangeResponse;
use super::RawKeyValue;
use super::RemoteStore;
use super::WatchEvent;
use super::WatchEventKind;
use super::WatchResponse;
use super::WatchStream;
use crate::Error;
use crate::Result;
use crate::StoreError;

const WATCH_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Lease {
    ttl: i64,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct MemState {
    revision: i64,
    compacted: i64,
    kvs: BTreeMap<String, RawKeyValue>,
    /// Every committed batch above `compacted`, in revision order
    history: Vec<WatchResponse>,
    leases: HashMap<i64, Lease>,
    next_lease_id: i64,
}

/// In-memory revisioned key-value store.
///
/// Behaves like a single-node strongly-consistent store: every mutation bumps
/// one global revision, watches replay retained history before switching to
/// live batches, and leases delete their keys on revocation or expiry.
///
/// Only the latest version of each key is kept. A read at any revision other
/// than the current one reports `StoreError::Compacted` (older) or
/// `StoreError::FutureRevision` (newer).
#[derive(Debug)]
pub struct MemStore {
    state: Mutex<MemState>,
    events: broadcast::Sender<WatchResponse>,
    /// Cancelled to break every open watch stream at once
    watch_breaker: Mutex<CancellationToken>,
    unavailable: AtomicBool,
    range_calls: AtomicU64,
    lease_renew_calls: AtomicU64,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MemState {
                next_lease_id: 1,
                ..Default::default()
            }),
            events,
            watch_breaker: Mutex::new(CancellationToken::new()),
            unavailable: AtomicBool::new(false),
            range_calls: AtomicU64::new(0),
            lease_renew_calls: AtomicU64::new(0),
        }
    }

    /// Current store revision
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Drops history at or below `revision`; watches starting there fail
    /// with `StoreError::Compacted`.
    pub fn compact(
        &self,
        revision: i64,
    ) {
        let mut state = self.state.lock();
        let revision = revision.min(state.revision);
        state.compacted = state.compacted.max(revision);
        let compacted = state.compacted;
        state.history.retain(|batch| batch.revision > compacted);
        debug!(compacted, "mem store compacted");
    }

    /// Terminates every open watch stream with `StoreError::WatchClosed`
    pub fn break_watches(&self) {
        let mut breaker = self.watch_breaker.lock();
        breaker.cancel();
        *breaker = CancellationToken::new();
    }

    /// Makes every call fail with `StoreError::Unavailable` until reset
    pub fn set_unavailable(
        &self,
        unavailable: bool,
    ) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `range` calls served so far
    pub fn range_calls(&self) -> u64 {
        self.range_calls.load(Ordering::SeqCst)
    }

    /// Number of `lease_renew` calls served so far
    pub fn lease_renew_calls(&self) -> u64 {
        self.lease_renew_calls.load(Ordering::SeqCst)
    }

    /// Revokes every lease whose deadline has passed.
    ///
    /// Returns the ids of the expired leases.
    pub fn expire_leases(&self) -> Vec<i64> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<i64> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.revoke_locked(&mut state, *id);
        }
        expired
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mem store marked unavailable".into()).into());
        }
        Ok(())
    }

    fn commit(
        &self,
        state: &mut MemState,
        events: Vec<WatchEvent>,
    ) {
        let batch = WatchResponse {
            revision: state.revision,
            events,
        };
        state.history.push(batch.clone());
        // No receiver simply means nobody is watching
        let _ = self.events.send(batch);
    }

    fn revoke_locked(
        &self,
        state: &mut MemState,
        lease_id: i64,
    ) -> bool {
        let Some(lease) = state.leases.remove(&lease_id) else {
            return false;
        };
        let keys: Vec<String> = lease
            .keys
            .into_iter()
            .filter(|key| state.kvs.contains_key(key))
            .collect();
        if keys.is_empty() {
            return true;
        }

        state.revision += 1;
        let revision = state.revision;
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            state.kvs.remove(&key);
            events.push(delete_event(key, revision));
        }
        trace!(lease_id, revision, "lease revoked");
        self.commit(state, events);
        true
    }
}

fn delete_event(
    key: String,
    revision: i64,
) -> WatchEvent {
    WatchEvent {
        kind: WatchEventKind::Delete,
        kv: KeyValue {
            key,
            value: Bytes::new(),
            create_revision: 0,
            mod_revision: revision,
            version: 0,
            lease: 0,
        },
    }
}

fn filter_batch(
    batch: &WatchResponse,
    prefix: &str,
) -> Option<WatchResponse> {
    let events: Vec<WatchEvent> = batch
        .events
        .iter()
        .filter(|event| event.kv.key.starts_with(prefix))
        .cloned()
        .collect();
    if events.is_empty() {
        return None;
    }
    Some(WatchResponse {
        revision: batch.revision,
        events,
    })
}

#[async_trait]
impl RemoteStore for MemStore {
    async fn range(
        &self,
        request: RangeRequest,
    ) -> Result<RangeResponse> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let state = self.state.lock();
        if request.revision > 0 && request.revision != state.revision {
            if request.revision > state.revision {
                return Err(StoreError::FutureRevision {
                    requested: request.revision,
                    current: state.revision,
                }
                .into());
            }
            return Err(StoreError::Compacted {
                requested: request.revision,
                compacted: state.revision,
            }
            .into());
        }

        let matched: Vec<&RawKeyValue> = if request.prefix {
            state
                .kvs
                .range(request.key.clone()..)
                .take_while(|(key, _)| key.starts_with(&request.key))
                .map(|(_, kv)| kv)
                .collect()
        } else {
            state.kvs.get(&request.key).into_iter().collect()
        };

        let count = matched.len() as i64;
        let kvs = if request.count_only {
            Vec::new()
        } else {
            let offset = request.offset.max(0) as usize;
            let limit = if request.limit > 0 {
                request.limit as usize
            } else {
                usize::MAX
            };
            matched
                .into_iter()
                .skip(offset)
                .take(limit)
                .map(|kv| {
                    let mut kv = kv.clone();
                    if request.key_only {
                        kv.value = Bytes::new();
                    }
                    kv
                })
                .collect()
        };

        Ok(RangeResponse {
            kvs,
            count,
            revision: state.revision,
        })
    }

    async fn list(
        &self,
        prefix: &str,
    ) -> Result<RangeResponse> {
        self.range(RangeRequest::with_prefix(prefix)).await
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        lease: i64,
    ) -> Result<i64> {
        self.check_available()?;

        let mut state = self.state.lock();
        if lease != 0 && !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease).into());
        }

        state.revision += 1;
        let revision = state.revision;
        let (create_revision, version, old_lease) = match state.kvs.get(key) {
            Some(prev) => (prev.create_revision, prev.version + 1, prev.lease),
            None => (revision, 1, 0),
        };
        if old_lease != 0 && old_lease != lease {
            if let Some(old) = state.leases.get_mut(&old_lease) {
                old.keys.remove(key);
            }
        }
        if let Some(attached) = state.leases.get_mut(&lease) {
            attached.keys.insert(key.to_string());
        }

        let kv = KeyValue {
            key: key.to_string(),
            value,
            create_revision,
            mod_revision: revision,
            version,
            lease,
        };
        state.kvs.insert(key.to_string(), kv.clone());
        self.commit(
            &mut state,
            vec![WatchEvent {
                kind: WatchEventKind::Put,
                kv,
            }],
        );
        Ok(revision)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<i64> {
        self.check_available()?;

        let mut state = self.state.lock();
        let Some(prev) = state.kvs.remove(key) else {
            return Ok(state.revision);
        };
        if let Some(lease) = state.leases.get_mut(&prev.lease) {
            lease.keys.remove(key);
        }
        state.revision += 1;
        let revision = state.revision;
        self.commit(&mut state, vec![delete_event(key.to_string(), revision)]);
        Ok(revision)
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: i64,
    ) -> Result<WatchStream> {
        self.check_available()?;

        let (replay, live) = {
            let state = self.state.lock();
            if state.compacted > 0 && from_revision <= state.compacted {
                return Err(StoreError::Compacted {
                    requested: from_revision,
                    compacted: state.compacted,
                }
                .into());
            }
            let replay: Vec<Result<WatchResponse>> = state
                .history
                .iter()
                .filter(|batch| batch.revision >= from_revision)
                .filter_map(|batch| filter_batch(batch, prefix))
                .map(Ok)
                .collect();
            // Subscribed under the state lock so no batch falls between
            // replay and live delivery
            (replay, self.events.subscribe())
        };

        let breaker = self.watch_breaker.lock().clone();
        let prefix = prefix.to_string();
        let live = BroadcastStream::new(live).filter_map(move |item| {
            let out: Option<Result<WatchResponse>> = match item {
                Ok(batch) if batch.revision >= from_revision => {
                    filter_batch(&batch, &prefix).map(Ok)
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    Some(Err(StoreError::WatchLagged(n).into()))
                }
            };
            futures::future::ready(out)
        });

        let closed =
            stream::once(async { Err::<WatchResponse, Error>(StoreError::WatchClosed.into()) });
        let stream = stream::iter(replay)
            .chain(live)
            .take_until(breaker.cancelled_owned())
            .chain(closed);
        Ok(Box::pin(stream))
    }

    async fn lease_grant(
        &self,
        ttl: i64,
    ) -> Result<i64> {
        self.check_available()?;

        let mut state = self.state.lock();
        let id = state.next_lease_id;
        state.next_lease_id += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + Duration::from_secs(ttl.max(0) as u64),
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn lease_renew(
        &self,
        lease_id: i64,
    ) -> Result<i64> {
        self.lease_renew_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut state = self.state.lock();
        let lease = state
            .leases
            .get_mut(&lease_id)
            .ok_or(StoreError::LeaseNotFound(lease_id))?;
        lease.deadline = Instant::now() + Duration::from_secs(lease.ttl.max(0) as u64);
        Ok(lease.ttl)
    }

    async fn lease_revoke(
        &self,
        lease_id: i64,
    ) -> Result<()> {
        self.check_available()?;

        let mut state = self.state.lock();
        if !self.revoke_locked(&mut state, lease_id) {
            return Err(StoreError::LeaseNotFound(lease_id).into());
        }
        Ok(())
    }
}
