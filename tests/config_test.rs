//! 配置文件与环境变量覆盖

use relay_store::config::{ConfigManager, EphemeralBackend, StorageMode};
use serial_test::serial;

#[test]
#[serial]
fn dev_config_file_parses() {
    let manager = ConfigManager::from_file("config/config.dev.toml").unwrap();
    let config = manager.config();
    assert_eq!(config.storage.mode, StorageMode::Hybrid);
    assert_eq!(config.redis.backend, EphemeralBackend::Memory);
    assert_eq!(config.rate_limit.login.points, 5);
    assert_eq!(config.timezone.offset_minutes, 480);
}

#[test]
#[serial]
#[allow(unsafe_code)]
fn env_overrides_file_values() {
    unsafe {
        std::env::set_var("RELAY_STORAGE_MODE", "durable");
        std::env::set_var("RELAY_DATABASE_URL", "sqlite::memory:");
    }
    let manager = ConfigManager::from_file("config/config.dev.toml");
    unsafe {
        std::env::remove_var("RELAY_STORAGE_MODE");
        std::env::remove_var("RELAY_DATABASE_URL");
    }

    let manager = manager.unwrap();
    assert_eq!(manager.config().storage.mode, StorageMode::Durable);
    assert_eq!(manager.config().database.url, "sqlite::memory:");
    assert!(manager.applied_overrides() >= 2);
}
