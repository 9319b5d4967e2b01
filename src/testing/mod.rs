//! # 测试框架模块
//!
//! 提供测试辅助函数与样例数据

#[cfg(any(test, feature = "testing"))]
pub mod helpers;

#[cfg(any(test, feature = "testing"))]
pub use helpers::*;
