//! # relay-store
//!
//! AI API 中转服务的存储核心：API 密钥、上游账号、会话、粘性映射、
//! 并发租约、限流和使用量计量。持久存储（sea-orm）与临时存储（Redis 或进程内存）
//! 按启动时选定的模式组合，调用方只面对统一的存储接口。

pub mod api_keys;
pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod lease;
pub mod logging;
pub mod metering;
pub mod rate_limit;
pub mod sticky;
pub mod store;
pub mod testing;
pub mod types;

pub use app::StorageContext;
pub use config::AppConfig;
pub use error::{Result, StoreError};
