use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use registry_core::store::MemStore;
use registry_core::BackoffPolicy;
use registry_core::RegistryConfig;
use registry_core::RegistryCore;
use tokio::time::sleep;
use tokio::time::timeout;

pub const WAIT_FOR_READY_IN_SEC: u64 = 3;

// Upper bound for background propagation (watch -> cache -> index -> notify)
pub const PROPAGATION_TIMEOUT_IN_MS: u64 = 2_000;

pub const POLL_INTERVAL_IN_MS: u64 = 10;

pub const DOMAIN_PROJECT: &str = "default/default";

/// Configuration with short timeouts and fast recovery, so that failure
/// paths resolve within a test
pub fn test_config() -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.retry.relist = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 1_000,
        base_delay_ms: 10,
        max_delay_ms: 50,
    };
    config.retry.lease_renew = BackoffPolicy {
        max_retries: 1,
        timeout_ms: 500,
        base_delay_ms: 10,
        max_delay_ms: 50,
    };
    config.cache.list_timeout_ms = 1_000;
    config.task.remove_interval_ms = 50;
    config.notify.add_timeout_ms = 100;
    config.notify.notify_timeout_ms = 200;
    config.notify.subscriber_buffer_size = 64;
    config
}

pub async fn start_registry(
    store: Arc<MemStore>,
    config: RegistryConfig,
) -> RegistryCore {
    let core = RegistryCore::build(config, store).expect("valid test config");
    core.run();
    timeout(Duration::from_secs(WAIT_FOR_READY_IN_SEC), core.ready())
        .await
        .expect("registry core not ready in time");
    core
}

/// Polls `check` until it yields true or the propagation timeout expires
pub async fn eventually<F, Fut>(
    what: &str,
    mut check: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(PROPAGATION_TIMEOUT_IN_MS);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        sleep(Duration::from_millis(POLL_INTERVAL_IN_MS)).await;
    }
    panic!("timed out waiting for {what}");
}

#[allow(dead_code)]
pub fn service_json(
    service_id: &str,
    version: &str,
) -> Bytes {
    Bytes::from(format!(
        r#"{{"serviceId":"{service_id}","serviceName":"{service_id}-name","version":"{version}"}}"#
    ))
}

#[allow(dead_code)]
pub fn instance_json(
    service_id: &str,
    instance_id: &str,
    status: &str,
) -> Bytes {
    Bytes::from(format!(
        r#"{{"instanceId":"{instance_id}","serviceId":"{service_id}","status":"{status}","endpoints":["rest://127.0.0.1:8080"]}}"#
    ))
}
