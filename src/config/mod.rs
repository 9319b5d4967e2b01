//! # 配置管理模块
//!
//! 处理配置加载、验证和凭据加密

mod app_config;
mod crypto;
mod database;
mod manager;

pub use app_config::{
    ApiKeyRateLimitConfig, AppConfig, ConcurrencyConfig, EphemeralBackend, RateLimitConfig,
    RateLimitTier, RedisConfig, SecurityConfig, StickyConfig, StorageConfig, StorageMode,
    TimezoneConfig,
};
pub use crypto::{SealedSecret, SecretCipher};
pub use database::DatabaseConfig;
pub use manager::ConfigManager;

/// 加载配置（文件 + 环境变量覆盖）并校验
pub fn load_config() -> crate::error::Result<AppConfig> {
    ConfigManager::new().map(ConfigManager::into_config)
}
