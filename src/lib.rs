//! Service registry core.
//!
//! An in-process, watch-driven mirror of a revisioned key-value store holding
//! service, instance, rule and schema records, with:
//! - cached point, prefix and count queries falling back to the store ([`cache`])
//! - per-key serialized async tasks, used for lease renewal ([`task`])
//! - typed publish/subscribe notifications with per-subscriber ordering ([`notify`])
//!
//! [`RegistryCore`] owns and wires all of them.

pub mod cache;
mod config;
pub mod constants;
mod errors;
pub mod event;
pub mod keys;
mod metrics;
pub mod notify;
mod registry;
pub mod store;
pub mod task;
mod types;
pub mod utils;

pub use config::*;
pub use errors::*;
pub use metrics::gather_metrics;
pub use metrics::init_metrics;
pub use registry::*;
pub use types::*;
pub use utils::*;


//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
