//! # 错误类型定义

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

use super::{ConversionError, ErrorCategory};

/// 存储层主要错误类型
#[derive(Debug, Error)]
pub enum StoreError {
    /// 配置相关错误
    #[error("配置错误: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 存储不可达（连接失败、连接中断、超时）
    #[error("连接错误: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 数据库相关错误
    #[error("数据库错误: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 缓存（临时存储）相关错误
    #[error("缓存错误: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 唯一性冲突，调用方可以重新生成后重试
    #[error("资源冲突: {entity} {key}")]
    Conflict { entity: String, key: String },

    /// 密文损坏或密钥不匹配
    #[error("解密失败: {message}")]
    Decryption {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// 序列化/反序列化错误
    #[error("序列化错误: {message}")]
    Serialization {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// 输入校验错误
    #[error("校验错误: {message}")]
    Validation { message: String },

    /// 系统内部错误
    #[error("内部错误: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// IO相关错误
    #[error("IO错误: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// 附加上下文的错误
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// 错误分类，决定是否可以原样暴露给调用方
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } | Self::Validation { .. } => ErrorCategory::Client,
            Self::Context { source, .. } => source.category(),
            _ => ErrorCategory::Server,
        }
    }

    /// 面向外部调用方的消息，服务端错误不泄露内部细节
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.category() {
            ErrorCategory::Client => self.root().to_string(),
            ErrorCategory::Server => "internal storage error".to_string(),
        }
    }

    /// 剥离上下文包装，返回最内层错误
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// 是否为唯一性冲突
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Conflict { .. })
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation { .. })
    }

    /// 是否为连接类错误
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self.root(), Self::Connection { .. })
    }

    /// 创建配置错误
    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的配置错误
    pub fn config_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建连接错误
    pub fn connection<T: Into<String>>(message: T) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的连接错误
    pub fn connection_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建数据库错误
    pub fn database<T: Into<String>>(message: T) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的数据库错误
    pub fn database_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建缓存错误
    pub fn cache<T: Into<String>>(message: T) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的缓存错误
    pub fn cache_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建唯一性冲突错误
    pub fn conflict<E: Into<String>, K: Into<String>>(entity: E, key: K) -> Self {
        Self::Conflict {
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// 创建带来源的解密错误
    pub fn decryption_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Decryption {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建解密错误
    pub fn decryption<T: Into<String>>(message: T) -> Self {
        Self::Decryption {
            message: message.into(),
            source: None,
        }
    }

    /// 创建序列化错误
    pub fn serialization<T: Into<String>, E: Into<anyhow::Error>>(message: T, source: E) -> Self {
        Self::Serialization {
            message: message.into(),
            source: source.into(),
        }
    }

    /// 创建校验错误
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带来源的内部错误
    pub fn internal_with_source<T: Into<String>, E: Into<anyhow::Error>>(
        message: T,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: "文件操作失败".to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_with_source("TOML解析失败", err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("JSON处理失败", err)
    }
}

impl From<ConversionError> for StoreError {
    fn from(err: ConversionError) -> Self {
        Self::serialization("存储字段类型转换失败", err)
    }
}

// 唯一索引冲突映射为 Conflict，连接类错误映射为 Connection
impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return Self::conflict("database", detail);
        }
        match err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
                Self::connection_with_source("数据库连接失败", err)
            }
            other => Self::database_with_source("数据库操作失败", other),
        }
    }
}

// Redis错误转换
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Self::connection_with_source("Redis连接失败", err)
        } else {
            Self::cache_with_source("Redis操作失败", err)
        }
    }
}
