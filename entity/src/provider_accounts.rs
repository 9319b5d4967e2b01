//! # 上游服务商账号实体定义
//!
//! 凭据字段 `credentials_sealed` 保存 AES-GCM 封装后的 JSON，
//! 只能整体替换，不允许局部修改。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 上游账号实体
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provider_accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub provider: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub credentials_sealed: Option<String>,
    pub status: String,
    pub priority: i32,
    pub schedulable: bool,
    pub account_type: String,
    pub proxy: Option<String>,
    /// 非敏感的服务商扩展字段（JSON 对象文本）
    #[sea_orm(column_type = "Text")]
    pub extra: String,
    pub expires_at: Option<DateTime>,
    pub last_refreshed_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
