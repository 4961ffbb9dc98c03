use std::time::Duration;

use super::notify::NotifyConfig;
use super::task::TaskConfig;

#[test]
fn test_default_notify_config() {
    let config = NotifyConfig::default();
    assert_eq!(config.queue_size, 5000);
    assert_eq!(config.add_timeout(), Duration::from_secs(1));
    assert_eq!(config.notify_timeout(), Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

#[test]
fn test_notify_validation() {
    let mut config = NotifyConfig::default();

    config.queue_size = 0;
    assert!(config.validate().is_err());

    config.queue_size = 1;
    config.subscriber_buffer_size = 0;
    assert!(config.validate().is_err());

    config.subscriber_buffer_size = 1;
    config.notify_timeout_ms = 0;
    assert!(config.validate().is_err());

    config.notify_timeout_ms = 1;
    assert!(config.validate().is_ok());
}

#[test]
fn test_task_config() {
    let config = TaskConfig::default();
    assert_eq!(config.remove_interval(), Duration::from_secs(30));
    assert!(config.validate().is_ok());

    let config = TaskConfig {
        remove_interval_ms: 9,
    };
    assert!(config.validate().is_err());
}
