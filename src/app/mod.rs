//! # 组合根
//!
//! 显式构造全部服务，不使用全局单例。

mod context;
mod tasks;

pub use context::StorageContext;
pub use tasks::BackgroundTasks;
