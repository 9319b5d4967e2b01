//! # 使用量统计实体定义
//!
//! 每行是一个时间桶的累加计数器，唯一键为
//! `(principal_id, principal_type, model, granularity, bucket)`。
//! 模型 `*` 表示全模型汇总。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 使用量时间桶
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "usage_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub principal_id: String,
    pub principal_type: String,
    pub model: String,
    /// hour / day / month / total
    pub granularity: String,
    pub bucket: String,
    pub requests: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub ephemeral_5m_tokens: i64,
    pub ephemeral_1h_tokens: i64,
    pub all_tokens: i64,
    pub long_context_input_tokens: i64,
    pub long_context_output_tokens: i64,
    pub long_context_requests: i64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
