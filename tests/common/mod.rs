//! 集成测试公共构造

#![allow(dead_code)]

use relay_store::StorageContext;
use relay_store::config::{AppConfig, DatabaseConfig, EphemeralBackend, StorageMode};

pub const TEST_KEY: &str = "integration-test-passphrase";

/// 内存 SQLite + 内存键值后端
pub fn config(mode: StorageMode) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.mode = mode;
    config.database = DatabaseConfig::in_memory();
    config.redis.backend = EphemeralBackend::Memory;
    config.security.encryption_key = TEST_KEY.to_string();
    config
}

pub async fn context(mode: StorageMode) -> StorageContext {
    StorageContext::connect(config(mode))
        .await
        .expect("存储上下文初始化失败")
}
