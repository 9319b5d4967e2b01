//! # 错误处理测试

use crate::error::{Context, ErrorCategory, StoreError};
use std::error::Error;

#[test]
fn test_config_error_creation() {
    let err = StoreError::config("测试配置错误");
    assert!(matches!(err, StoreError::Config { .. }));
    assert_eq!(err.to_string(), "配置错误: 测试配置错误");
}

#[test]
fn test_config_error_with_source() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "文件不存在");
    let err = StoreError::config_with_source("配置文件加载失败", io_err);

    assert!(matches!(err, StoreError::Config { .. }));
    assert!(err.to_string().contains("配置错误: 配置文件加载失败"));
    assert!(err.source().is_some());
}

#[test]
fn test_context_wraps_and_keeps_root() {
    let result: Result<(), StoreError> = Err(StoreError::conflict("api_key", "hash"));
    let err = result.context("签发密钥失败").unwrap_err();

    assert_eq!(err.to_string(), "签发密钥失败");
    assert!(err.is_conflict());
    assert_eq!(err.category(), ErrorCategory::Client);
}

#[test]
fn test_auto_conversion_from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "文件不存在");
    let err: StoreError = io_err.into();

    assert!(matches!(err, StoreError::Io { .. }));
    assert!(err.to_string().contains("IO错误: 文件操作失败"));
}

#[test]
fn test_auto_conversion_from_toml_error() {
    let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
    let err: StoreError = toml_err.into();

    assert!(matches!(err, StoreError::Config { .. }));
    assert!(err.to_string().contains("配置错误: TOML解析失败"));
}

#[test]
fn test_db_connection_error_is_connection() {
    let db_err = sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal("refused".to_string()));
    let err: StoreError = db_err.into();

    assert!(err.is_connection());
    assert_eq!(err.category(), ErrorCategory::Server);
}

#[test]
fn test_server_errors_hide_details() {
    let err = StoreError::database("SELECT secret FROM provider_accounts failed");
    assert_eq!(err.public_message(), "internal storage error");

    let err = StoreError::validation("名称不能为空");
    assert_eq!(err.public_message(), "校验错误: 名称不能为空");
}

#[test]
fn test_validation_macro() {
    fn check(limit: i64) -> crate::error::Result<()> {
        crate::ensure_valid!(limit >= 0, "限额不能为负数: {}", limit);
        Ok(())
    }

    assert!(check(1).is_ok());
    let err = check(-1).unwrap_err();
    assert!(matches!(err, StoreError::Validation { .. }));
    assert!(err.to_string().contains("-1"));
}
