// -
// Key layout

/// Root of every record the registry stores in the remote key-value store
pub const REGISTRY_ROOT_KEY: &str = "/cse-sr";

pub const SERVICE_ROOT_KEY: &str = "/cse-sr/ms/files/";
pub const INSTANCE_ROOT_KEY: &str = "/cse-sr/inst/files/";
pub const INSTANCE_LEASE_ROOT_KEY: &str = "/cse-sr/inst/leases/";
pub const RULE_ROOT_KEY: &str = "/cse-sr/ms/rules/";
pub const SCHEMA_ROOT_KEY: &str = "/cse-sr/ms/schemas/";

pub const SPLIT: &str = "/";

// -
// Collection names, used as metric labels and log fields

pub const SERVICE_COLLECTION: &str = "service";
pub const INSTANCE_COLLECTION: &str = "instance";
pub const RULE_COLLECTION: &str = "rule";
pub const SCHEMA_COLLECTION: &str = "schema";

// -
// Task keys

/// Prefix of every lease renewal task key
pub const LEASE_TASK_KEY_PREFIX: &str = "lease:";

// -
// Notify

/// Subject and id of the pseudo-subscriber that reaps failed subscribers
pub const HEALTH_CHECKER_SUBJECT: &str = "__HealthChecker__";


/// Slow lease renewals above this threshold are logged at warn level
pub const SLOW_LEASE_RENEW_MS: u64 = 2_000;
