//! # 数据库配置

use crate::error::{Result, StoreError};
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};
use sea_orm::ConnectOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库URL（sqlite / mysql / postgres）
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
    /// 查询超时时间（秒）
    pub query_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/relay.db".to_string(),
            max_connections: 10,
            connect_timeout: 30,
            query_timeout: 60,
        }
    }
}

impl DatabaseConfig {
    /// 内存 SQLite，仅用于测试
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// 确保数据库路径存在（仅对SQLite文件数据库）
    pub fn ensure_database_path(&self) -> Result<()> {
        if self.is_sqlite() && !self.is_memory_database() {
            let path_str = self
                .url
                .strip_prefix("sqlite://")
                .or_else(|| self.url.strip_prefix("sqlite:"))
                .unwrap_or(&self.url);
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            let db_path = Path::new(path_str);

            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::config_with_source(
                            format!("无法创建数据库目录: {}", parent.display()),
                            e,
                        )
                    })?;

                    linfo!(
                        "system",
                        LogStage::Startup,
                        LogComponent::Database,
                        "create_db_dir",
                        &format!("创建数据库目录: {}", parent.display())
                    );
                }
            }
        }

        Ok(())
    }

    /// 获取准备好的数据库连接字符串。SQLite 文件库自动追加 `mode=rwc` 以便首次创建
    pub fn connection_url(&self) -> Result<String> {
        self.ensure_database_path()?;
        if self.is_sqlite() && !self.is_memory_database() && !self.url.contains("mode=") {
            let sep = if self.url.contains('?') { '&' } else { '?' };
            return Ok(format!("{}{sep}mode=rwc", self.url));
        }
        Ok(self.url.clone())
    }

    /// 构造 sea-orm 连接参数
    pub fn connect_options(&self) -> Result<ConnectOptions> {
        let mut options = ConnectOptions::new(self.connection_url()?);
        options
            .max_connections(self.max_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .acquire_timeout(Duration::from_secs(self.query_timeout))
            .sqlx_logging(false);
        if self.is_memory_database() {
            // 每个内存连接是一个独立的库，必须限定单连接
            options.max_connections(1).min_connections(1);
        }
        Ok(options)
    }

    /// 检查是否为内存数据库
    #[must_use]
    pub fn is_memory_database(&self) -> bool {
        self.url.contains(":memory:")
    }

    /// 检查是否为SQLite数据库
    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_file_url_gets_create_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}/nested/relay.db", dir.path().display()),
            ..DatabaseConfig::default()
        };

        let url = config.connection_url().unwrap();
        assert!(url.ends_with("?mode=rwc"));
        assert!(dir.path().join("nested").exists());
    }

    #[test]
    fn test_memory_url_untouched() {
        let config = DatabaseConfig::in_memory();
        assert!(config.is_memory_database());
        assert_eq!(config.connection_url().unwrap(), "sqlite::memory:");
    }
}
