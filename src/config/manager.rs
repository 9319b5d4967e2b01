//! # 配置管理器
//!
//! 加载 TOML 配置文件并应用 `RELAY_` 前缀的环境变量覆盖

use std::env;
use std::path::Path;

use super::{AppConfig, EphemeralBackend, StorageMode};
use crate::error::{Result, StoreError};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 环境变量前缀
const ENV_PREFIX: &str = "RELAY_";

/// 配置管理器
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: AppConfig,
    applied_overrides: usize,
}

impl ConfigManager {
    /// 从默认位置加载：`RELAY_STORE_CONFIG` 指定路径，否则 `config/config.{RUST_ENV}.toml`。
    /// 文件不存在时使用内置默认值
    pub fn new() -> Result<Self> {
        let config_file = env::var("RELAY_STORE_CONFIG").unwrap_or_else(|_| {
            let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
            format!("config/config.{env}.toml")
        });

        if Path::new(&config_file).exists() {
            Self::from_file(&config_file)
        } else {
            lwarn!(
                "system",
                LogStage::Configuration,
                LogComponent::Config,
                "config_missing",
                &format!("配置文件不存在，使用默认配置: {config_file}")
            );
            Self::from_config(AppConfig::default())
        }
    }

    /// 从指定文件创建配置管理器
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::load_config_file(config_path.as_ref())?;
        Self::from_config(config)
    }

    /// 基于已有配置创建，同样应用环境变量覆盖
    pub fn from_config(mut config: AppConfig) -> Result<Self> {
        let applied_overrides = Self::apply_env_overrides(&mut config, env::vars())?;
        config.validate()?;

        linfo!(
            "system",
            LogStage::Configuration,
            LogComponent::Config,
            "config_loaded",
            "配置加载完成",
            storage_mode = %config.storage.mode,
            env_overrides = applied_overrides
        );

        Ok(Self {
            config,
            applied_overrides,
        })
    }

    /// 获取当前配置
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 取出配置
    #[must_use]
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// 生效的环境变量覆盖数量
    #[must_use]
    pub const fn applied_overrides(&self) -> usize {
        self.applied_overrides
    }

    /// 加载配置文件
    fn load_config_file(path: &Path) -> Result<AppConfig> {
        if !path.exists() {
            return Err(StoreError::config(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
        })?;

        toml::from_str(&content).map_err(|e| {
            StoreError::config_with_source(format!("TOML解析失败 - 配置文件: {}", path.display()), e)
        })
    }

    /// 应用环境变量覆盖，返回生效的条数
    pub fn apply_env_overrides<I>(config: &mut AppConfig, vars: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            if Self::apply_override(config, &path, &value)? {
                ldebug!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Config,
                    "env_override",
                    &format!(
                        "应用环境变量覆盖: {path} = {}",
                        if is_sensitive(&path) { "***" } else { value.as_str() }
                    )
                );
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// 将单个覆盖应用到配置对象，未知路径返回 false
    fn apply_override(config: &mut AppConfig, path: &str, value: &str) -> Result<bool> {
        match path {
            "storage_mode" => config.storage.mode = value.parse::<StorageMode>()?,
            "mirror_queue_capacity" => {
                config.storage.mirror_queue_capacity = parse_number(path, value)?;
            }
            "database_url" => config.database.url = value.to_string(),
            "database_max_connections" => {
                config.database.max_connections = parse_number(path, value)?;
            }
            "redis_url" => config.redis.url = value.to_string(),
            "redis_backend" => {
                config.redis.backend = match value.to_ascii_lowercase().as_str() {
                    "memory" => EphemeralBackend::Memory,
                    "redis" => EphemeralBackend::Redis,
                    other => {
                        return Err(StoreError::config(format!("未知的临时存储后端: {other}")));
                    }
                };
            }
            "redis_key_prefix" => config.redis.key_prefix = value.to_string(),
            "encryption_key" => config.security.encryption_key = value.to_string(),
            "api_key_prefix" => config.security.api_key_prefix = value.to_string(),
            "timezone_offset_minutes" => {
                config.timezone.offset_minutes = parse_number(path, value)?;
            }
            "default_lease_secs" => {
                config.concurrency.default_lease_secs = parse_number(path, value)?;
            }
            "sticky_ttl_secs" => config.sticky.ttl_secs = parse_number(path, value)?,
            // RELAY_STORE_CONFIG 是配置文件路径本身
            "store_config" => return Ok(false),
            _ => {
                lwarn!(
                    "system",
                    LogStage::Configuration,
                    LogComponent::Config,
                    "unknown_override",
                    &format!("未知的配置路径，忽略环境变量覆盖: {path}")
                );
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn is_sensitive(path: &str) -> bool {
    path.contains("key") || path.contains("password") || path.contains("url")
}

fn parse_number<T>(path: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .map_err(|e| StoreError::config_with_source(format!("无效的数值 {path}={value}"), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = AppConfig::default();
        let applied = ConfigManager::apply_env_overrides(
            &mut config,
            vars(&[
                ("RELAY_STORAGE_MODE", "durable"),
                ("RELAY_DATABASE_URL", "sqlite::memory:"),
                ("RELAY_TIMEZONE_OFFSET_MINUTES", "-300"),
                ("RELAY_UNKNOWN_THING", "x"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(applied, 3);
        assert_eq!(config.storage.mode, StorageMode::Durable);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.timezone.offset_minutes, -300);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let mut config = AppConfig::default();
        let result = ConfigManager::apply_env_overrides(
            &mut config,
            vars(&[("RELAY_DEFAULT_LEASE_SECS", "soon")]),
        );
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    #[allow(unsafe_code)]
    fn test_from_file_with_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [storage]
            mode = "hybrid"

            [redis]
            backend = "memory"

            [security]
            encryption_key = "from-file"
            "#
        )
        .unwrap();

        unsafe {
            env::set_var("RELAY_STICKY_TTL_SECS", "120");
        }
        let manager = ConfigManager::from_file(file.path());
        unsafe {
            env::remove_var("RELAY_STICKY_TTL_SECS");
        }

        let manager = manager.unwrap();
        assert_eq!(manager.config().sticky.ttl_secs, 120);
        assert_eq!(manager.config().redis.backend, EphemeralBackend::Memory);
        assert_eq!(manager.config().security.encryption_key, "from-file");
    }
}
