//! Registry records stored under the registry root.
//!
//! Records are JSON documents in the remote store. Only the fields the core
//! routes on are typed; everything else is carried in `properties`.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicroService {
    pub service_id: String,
    pub app_id: String,
    pub service_name: String,
    pub version: String,
    pub environment: String,
    pub status: String,
    pub schemas: Vec<String>,
    pub properties: HashMap<String, String>,
    pub timestamp: String,
    pub mod_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheck {
    /// "push" (heartbeat) or "pull"
    pub mode: String,
    pub port: i32,
    /// Heartbeat interval in seconds
    pub interval: i32,
    pub times: i32,
}

impl HealthCheck {
    /// Lease TTL derived from the heartbeat contract
    pub fn ttl(&self) -> i64 {
        i64::from(self.interval.max(0)) * i64::from(self.times.max(0) + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_id: String,
    pub endpoints: Vec<String>,
    pub host_name: String,
    pub status: String,
    pub health_check: Option<HealthCheck>,
    pub properties: HashMap<String, String>,
    pub version: String,
    pub timestamp: String,
    pub mod_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub rule_id: String,
    pub rule_type: String,
    pub attribute: String,
    pub pattern: String,
    pub description: String,
    pub timestamp: String,
    pub mod_timestamp: String,
}
