//! # 粘性会话映射实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 会话指纹到上游账号的映射
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sticky_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub fingerprint: String,
    pub account_id: String,
    pub account_type: String,
    pub ttl_secs: i64,
    pub expires_at: i64,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
