//! # API 密钥实体定义
//!
//! 客户端 API 密钥表。只保存密钥的 SHA-256 摘要和展示用预览，
//! 明文只在签发时返回一次。

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// API 密钥实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    #[sea_orm(unique)]
    pub secret_hash: String,
    pub preview: String,
    pub owner_id: Option<String>,
    pub rate_limit_rpm: i64,
    pub rate_limit_rpd: i64,
    pub token_limit: i64,
    pub concurrency_limit: i64,
    pub daily_cost_limit: f64,
    pub weekly_opus_cost_limit: f64,
    pub restrict_models: bool,
    /// JSON 数组文本
    #[sea_orm(column_type = "Text")]
    pub allowed_models: String,
    pub restrict_clients: bool,
    /// JSON 数组文本
    #[sea_orm(column_type = "Text")]
    pub allowed_clients: String,
    pub activates_at: Option<DateTime>,
    pub expires_at: Option<DateTime>,
    pub status: String,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime>,
    pub last_used_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
