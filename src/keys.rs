//! Hierarchical key layout.
//!
//! ```text
//! /cse-sr/ms/files/{domain}/{project}/{service_id}
//! /cse-sr/inst/files/{domain}/{project}/{service_id}/{instance_id}
//! /cse-sr/inst/leases/{domain}/{project}/{service_id}/{instance_id}
//! /cse-sr/ms/rules/{domain}/{project}/{service_id}/{rule_id}
//! /cse-sr/ms/schemas/{domain}/{project}/{service_id}/{schema_id}
//! ```

use crate::constants::INSTANCE_LEASE_ROOT_KEY;
use crate::constants::INSTANCE_ROOT_KEY;
use crate::constants::RULE_ROOT_KEY;
use crate::constants::SCHEMA_ROOT_KEY;
use crate::constants::SERVICE_ROOT_KEY;

/// Tenant scope, `{domain}/{project}`
pub fn domain_project(
    domain: &str,
    project: &str,
) -> String {
    format!("{domain}/{project}")
}

pub fn service_key(
    domain_project: &str,
    service_id: &str,
) -> String {
    format!("{SERVICE_ROOT_KEY}{domain_project}/{service_id}")
}

pub fn service_root_key(domain_project: &str) -> String {
    format!("{SERVICE_ROOT_KEY}{domain_project}/")
}

pub fn instance_key(
    domain_project: &str,
    service_id: &str,
    instance_id: &str,
) -> String {
    format!("{INSTANCE_ROOT_KEY}{domain_project}/{service_id}/{instance_id}")
}

/// Prefix of every instance of one service
pub fn instance_root_key(
    domain_project: &str,
    service_id: &str,
) -> String {
    format!("{INSTANCE_ROOT_KEY}{domain_project}/{service_id}/")
}

pub fn instance_lease_key(
    domain_project: &str,
    service_id: &str,
    instance_id: &str,
) -> String {
    format!("{INSTANCE_LEASE_ROOT_KEY}{domain_project}/{service_id}/{instance_id}")
}

pub fn rule_key(
    domain_project: &str,
    service_id: &str,
    rule_id: &str,
) -> String {
    format!("{RULE_ROOT_KEY}{domain_project}/{service_id}/{rule_id}")
}

pub fn schema_key(
    domain_project: &str,
    service_id: &str,
    schema_id: &str,
) -> String {
    format!("{SCHEMA_ROOT_KEY}{domain_project}/{service_id}/{schema_id}")
}

/// Components of an instance key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceKey {
    pub domain_project: String,
    pub service_id: String,
    pub instance_id: String,
}

impl InstanceKey {
    /// Notification subject: every watcher of the service hears about it
    pub fn subject(&self) -> String {
        format!("{}/{}", self.domain_project, self.service_id)
    }
}

/// Splits `/cse-sr/inst/files/{domain}/{project}/{service}/{instance}`.
///
/// Returns `None` for keys outside the instance root or with a missing part.
pub fn parse_instance_key(key: &str) -> Option<InstanceKey> {
    let rest = key.strip_prefix(INSTANCE_ROOT_KEY)?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(InstanceKey {
        domain_project: domain_project(parts[0], parts[1]),
        service_id: parts[2].to_string(),
        instance_id: parts[3].to_string(),
    })
}
