//! # 日志配置模块
//!
//! 基于 `tracing` 的结构化日志。所有业务日志通过 `linfo!`/`ldebug!`/`lwarn!`/`lerror!`
//! 输出，统一携带 `request_id`、阶段、组件和操作名字段，便于按字段过滤。

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    Startup,
    Shutdown,
    Configuration,
    Db,
    Cache,
    Authentication,
    Lease,
    RateLimit,
    Metering,
    Mirror,
    Cleanup,
    Internal,
}

impl LogStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Db => "db",
            Self::Cache => "cache",
            Self::Authentication => "authentication",
            Self::Lease => "lease",
            Self::RateLimit => "rate_limit",
            Self::Metering => "metering",
            Self::Mirror => "mirror",
            Self::Cleanup => "cleanup",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    Main,
    Config,
    Database,
    Cache,
    Crypto,
    ApiKey,
    Account,
    Session,
    Sticky,
    Lease,
    RateLimiter,
    Usage,
    Cost,
    Hybrid,
    Mirror,
}

impl LogComponent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Crypto => "crypto",
            Self::ApiKey => "api_key",
            Self::Account => "account",
            Self::Session => "session",
            Self::Sticky => "sticky",
            Self::Lease => "lease",
            Self::RateLimiter => "rate_limiter",
            Self::Usage => "usage",
            Self::Cost => "cost",
            Self::Hybrid => "hybrid",
            Self::Mirror => "mirror",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 结构化 info 日志：`linfo!(request_id, stage, component, operation, message, fields...)`
#[macro_export]
macro_rules! linfo {
    ($rid:expr, $stage:expr, $comp:expr, $op:expr, $msg:expr $(, $($field:tt)+)?) => {
        ::tracing::info!(
            message = %$msg,
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = $op
            $(, $($field)+)?
        )
    };
}

/// 结构化 debug 日志
#[macro_export]
macro_rules! ldebug {
    ($rid:expr, $stage:expr, $comp:expr, $op:expr, $msg:expr $(, $($field:tt)+)?) => {
        ::tracing::debug!(
            message = %$msg,
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = $op
            $(, $($field)+)?
        )
    };
}

/// 结构化 warn 日志
#[macro_export]
macro_rules! lwarn {
    ($rid:expr, $stage:expr, $comp:expr, $op:expr, $msg:expr $(, $($field:tt)+)?) => {
        ::tracing::warn!(
            message = %$msg,
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = $op
            $(, $($field)+)?
        )
    };
}

/// 结构化 error 日志
#[macro_export]
macro_rules! lerror {
    ($rid:expr, $stage:expr, $comp:expr, $op:expr, $msg:expr $(, $($field:tt)+)?) => {
        ::tracing::error!(
            message = %$msg,
            request_id = %$rid,
            stage = %$stage,
            component = %$comp,
            operation = $op
            $(, $($field)+)?
        )
    };
}

/// 默认过滤规则：关闭 sqlx 查询明细
fn default_filter(level: &str) -> String {
    format!("{level},relay_store=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn")
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先生效。重复调用是安全的（第二次初始化被忽略）。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let initialized = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .is_ok();

    if initialized {
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "init_logging",
            "日志系统初始化完成",
            log_level = level
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_silences_sqlx() {
        let filter = default_filter("warn");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("sqlx::query=off"));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(LogStage::RateLimit.to_string(), "rate_limit");
        assert_eq!(LogComponent::ApiKey.to_string(), "api_key");
    }
}
