//! # OAuth 握手会话实体定义
//!
//! 保存 PKCE 校验码、state 等短期数据，默认 10 分钟过期

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// OAuth 握手会话
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub expires_at: i64,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
