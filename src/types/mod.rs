//! # 领域类型
//!
//! 存储层对外暴露的强类型记录，以及时间桶和模型名等通用工具

pub mod conversion;
pub mod model_name;
pub mod records;
pub mod timezone;
pub mod usage;

pub use model_name::{UNKNOWN_MODEL, normalize_model_name};
pub use records::*;
pub use timezone::{BucketClock, TOTAL_BUCKET, TimeBuckets};
pub use usage::*;
