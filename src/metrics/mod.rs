use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref CACHE_ENTRIES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("cache_entries", "Number of entries in a collection cache"),
        &["collection"]
    )
    .expect("metric can not be created");

    pub static ref PREFIX_INDEX_NODES_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("prefix_index_nodes", "Number of prefix nodes in a collection index"),
        &["collection"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_EVENTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_events", "Cache events emitted by the watch refresher"),
        &["collection", "event_type"]
    )
    .expect("metric can not be created");

    pub static ref DROPPED_EVENTS_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new("dropped_events", "Events dropped on a full bounded queue"),
        &["component", "name"]
    )
    .expect("metric can not be created");

    pub static ref TASK_SCHEDULERS_METRIC: IntGauge = IntGauge::new(
        "task_schedulers",
        "Number of live per-key task schedulers"
    )
    .expect("metric can not be created");

    pub static ref SUBSCRIBERS_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("subscribers", "Number of subscribers per notify type"),
        &["notify_type"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFY_QUEUE_DEPTH_METRIC: IntGaugeVec = IntGaugeVec::new(
        Opts::new("notify_queue_depth", "Pending jobs in a notify type queue"),
        &["notify_type"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CACHE_ENTRIES_METRIC.clone()),
        Box::new(PREFIX_INDEX_NODES_METRIC.clone()),
        Box::new(CACHE_EVENTS_METRIC.clone()),
        Box::new(DROPPED_EVENTS_METRIC.clone()),
        Box::new(TASK_SCHEDULERS_METRIC.clone()),
        Box::new(SUBSCRIBERS_METRIC.clone()),
        Box::new(NOTIFY_QUEUE_DEPTH_METRIC.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {:?}", e);
        }
    }
}

/// Registers the crate collectors on [`REGISTRY`] and initialises the
/// autometrics exporter. Safe to call more than once.
pub fn init_metrics() {
    REGISTER.call_once(|| {
        register_custom_metrics(&REGISTRY);
        prometheus_exporter::init();
    });
}

/// Renders every registry metric plus the autometrics series in the
/// Prometheus text format.
pub fn gather_metrics() -> String {
    init_metrics();

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    let mut res = match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            warn!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };

    match prometheus_exporter::encode_to_string() {
        Ok(body) => res.push_str(&body),
        Err(e) => warn!("could not encode autometrics metrics: {:?}", e),
    }
    res
}

pub(crate) fn record_drop(
    component: &str,
    name: &str,
) {
    DROPPED_EVENTS_METRIC.with_label_values(&[component, name]).inc();
}
