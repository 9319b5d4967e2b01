//! # 并发租约实体定义
//!
//! `(owner_id, request_id)` 唯一；未过期租约的数量即当前并发数

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 并发租约
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "concurrency_leases")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub owner_id: String,
    pub request_id: String,
    pub expires_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
