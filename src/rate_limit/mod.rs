//! # 限流
//!
//! 计数始终落在临时存储上；纯持久模式下使用进程内存后端。

mod limiter;
mod registry;

pub use limiter::{FixedWindowLimiter, RateLimitDecision};
pub use registry::{API_KEY_SCOPE, RateLimiterRegistry};
