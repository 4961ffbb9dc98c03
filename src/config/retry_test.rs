use super::retry::BackoffPolicy;
use super::retry::RetryPolicies;

#[test]
fn test_default_policies() {
    let policies = RetryPolicies::default();
    assert!(policies.relist.is_unlimited());
    assert_eq!(policies.relist.base_delay_ms, 500);
    assert_eq!(policies.lease_renew.max_retries, 1);
    assert!(policies.validate().is_ok());
}

#[test]
fn test_relist_must_be_unlimited() {
    let mut policies = RetryPolicies::default();
    policies.relist.max_retries = 3;
    assert!(policies.validate().is_err());
}

#[test]
fn test_max_delay_below_base_is_rejected() {
    let policies = RetryPolicies {
        lease_renew: BackoffPolicy {
            max_retries: 1,
            timeout_ms: 100,
            base_delay_ms: 500,
            max_delay_ms: 100,
        },
        ..Default::default()
    };
    assert!(policies.validate().is_err());
}
