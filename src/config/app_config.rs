//! # 应用配置结构定义

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DatabaseConfig;
use crate::error::{Result, StoreError};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 存储模式与缓存策略
    #[serde(default)]
    pub storage: StorageConfig,
    /// 数据库（持久存储）配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 临时存储配置
    #[serde(default)]
    pub redis: RedisConfig,
    /// 加密与密钥配置
    #[serde(default)]
    pub security: SecurityConfig,
    /// 统计分桶时区
    #[serde(default)]
    pub timezone: TimezoneConfig,
    /// 并发租约
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// 粘性会话
    #[serde(default)]
    pub sticky: StickyConfig,
    /// 限流档位
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.storage.mode.uses_durable() {
            crate::ensure_config!(!self.database.url.is_empty(), "数据库URL不能为空");
            crate::ensure_config!(
                self.database.max_connections > 0,
                "数据库最大连接数必须大于0"
            );
        }
        if self.storage.mode.uses_ephemeral() && self.redis.backend == EphemeralBackend::Redis {
            crate::ensure_config!(!self.redis.url.is_empty(), "Redis URL不能为空");
        }
        crate::ensure_config!(
            self.storage.mirror_queue_capacity > 0,
            "异步镜像队列容量必须大于0"
        );
        crate::ensure_config!(
            !self.security.encryption_key.is_empty(),
            "必须配置 security.encryption_key"
        );
        crate::ensure_config!(
            self.concurrency.default_lease_secs > 0,
            "默认租约时长必须大于0"
        );
        self.timezone.offset()?;
        for (name, tier) in [
            ("global", &self.rate_limit.global),
            ("login", &self.rate_limit.login),
            ("register", &self.rate_limit.register),
        ] {
            crate::ensure_config!(
                tier.points > 0 && tier.duration_secs > 0,
                "限流档位 {} 的 points 与 duration_secs 必须大于0",
                name
            );
        }
        Ok(())
    }
}

/// 存储模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// 仅临时存储
    Ephemeral,
    /// 仅持久存储
    Durable,
    /// 持久存储为准，临时存储做缓存与实时计数
    #[default]
    Hybrid,
}

impl StorageMode {
    #[must_use]
    pub const fn uses_durable(self) -> bool {
        matches!(self, Self::Durable | Self::Hybrid)
    }

    #[must_use]
    pub const fn uses_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral | Self::Hybrid)
    }
}

impl FromStr for StorageMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ephemeral" | "redis" => Ok(Self::Ephemeral),
            "durable" | "database" | "mysql" | "sqlite" => Ok(Self::Durable),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(StoreError::config(format!("未知的存储模式: {other}"))),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ephemeral => "ephemeral",
            Self::Durable => "durable",
            Self::Hybrid => "hybrid",
        })
    }
}

/// 存储层配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,
    /// 混合模式下 API 密钥缓存时长（秒）
    pub api_key_cache_ttl_secs: u64,
    /// 混合模式下上游账号缓存时长（秒）
    pub account_cache_ttl_secs: u64,
    /// 异步镜像队列容量。进程崩溃时最多丢失队列中尚未落库的增量
    pub mirror_queue_capacity: usize,
    /// 持久存储中每个主体保留的使用记录条数
    pub durable_usage_record_limit: usize,
    /// 临时存储中每个主体保留的使用记录条数
    pub ephemeral_usage_record_limit: usize,
    /// 使用记录保留天数（cleanup 时删除更早的记录）
    pub usage_record_retention_days: i64,
    /// 后台清理间隔（秒），0 表示不启动
    pub cleanup_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Hybrid,
            api_key_cache_ttl_secs: 3600,
            account_cache_ttl_secs: 600,
            mirror_queue_capacity: 10_000,
            durable_usage_record_limit: 200,
            ephemeral_usage_record_limit: 50,
            usage_record_retention_days: 30,
            cleanup_interval_secs: 3600,
        }
    }
}

/// 临时存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EphemeralBackend {
    /// 进程内存（单实例或测试）
    Memory,
    /// Redis
    #[default]
    Redis,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub backend: EphemeralBackend,
    /// Redis连接URL
    pub url: String,
    /// 连接超时时间（秒）
    pub connection_timeout: u64,
    /// 所有键的公共前缀，多个环境共用一个 Redis 时使用
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            backend: EphemeralBackend::Redis,
            url: "redis://127.0.0.1:6379/0".to_string(),
            connection_timeout: 5,
            key_prefix: String::new(),
        }
    }
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// 64 位十六进制密钥，或任意口令（取 SHA-256 派生 32 字节密钥）
    pub encryption_key: String,
    /// 签发的 API 密钥前缀
    pub api_key_prefix: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            api_key_prefix: "cr_".to_string(),
        }
    }
}

/// 时区配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimezoneConfig {
    /// 相对 UTC 的偏移（分钟），默认 UTC+8
    pub offset_minutes: i32,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        Self {
            offset_minutes: 8 * 60,
        }
    }
}

impl TimezoneConfig {
    /// 偏移超出 ±14 小时视为无效
    pub fn offset(&self) -> Result<FixedOffset> {
        if self.offset_minutes.abs() > 14 * 60 {
            return Err(StoreError::config(format!(
                "无效的时区偏移: {} 分钟",
                self.offset_minutes
            )));
        }
        FixedOffset::east_opt(self.offset_minutes * 60).ok_or_else(|| {
            StoreError::config(format!("无效的时区偏移: {} 分钟", self.offset_minutes))
        })
    }
}

/// 并发租约配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub default_lease_secs: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_lease_secs: 300,
        }
    }
}

/// 粘性会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickyConfig {
    pub ttl_secs: u64,
}

impl Default for StickyConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

/// 单个限流档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub points: u64,
    pub duration_secs: u64,
    pub block_secs: u64,
}

/// API 密钥限流档位，points 取自密钥自身的 RPM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyRateLimitConfig {
    pub duration_secs: u64,
    pub block_secs: u64,
    /// 闲置多久后回收限流器实例
    pub idle_evict_secs: u64,
    /// 回收任务的执行间隔
    pub cleanup_interval_secs: u64,
}

impl Default for ApiKeyRateLimitConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            block_secs: 60,
            idle_evict_secs: 3600,
            cleanup_interval_secs: 600,
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub global: RateLimitTier,
    pub login: RateLimitTier,
    pub register: RateLimitTier,
    pub api_key: ApiKeyRateLimitConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: RateLimitTier {
                points: 1000,
                duration_secs: 60,
                block_secs: 600,
            },
            login: RateLimitTier {
                points: 5,
                duration_secs: 900,
                block_secs: 900,
            },
            register: RateLimitTier {
                points: 3,
                duration_secs: 3600,
                block_secs: 3600,
            },
            api_key: ApiKeyRateLimitConfig::default(),
        }
    }
}
