//! # 费用统计实体定义

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 费用时间桶，唯一键 `(principal_id, principal_type, period, bucket)`
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cost_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub principal_id: String,
    pub principal_type: String,
    /// hourly / daily / monthly / weekly_opus / total
    pub period: String,
    pub bucket: String,
    pub amount: f64,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
