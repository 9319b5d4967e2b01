use async_trait::async_trait;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, Iterable, QueryFilter, QueryOrder,
    sea_query::OnConflict,
};

use entity::api_keys::{self, Column, Entity};

use super::{DurableStore, to_i64, to_u64};
use crate::error::Result;
use crate::store::traits::ApiKeyRepo;
use crate::types::timezone::{from_naive, to_naive};
use crate::types::{
    ActivationWindow, ApiKeyLimits, ApiKeyRecord, ApiKeyRestrictions, SoftDelete,
    conversion::coerce_string_list,
};

fn to_record(model: api_keys::Model) -> Result<ApiKeyRecord> {
    let deleted = match (model.deleted_at, model.deleted_by) {
        (Some(at), by) => Some(SoftDelete {
            deleted_by: by.unwrap_or_default(),
            deleted_at: from_naive(at),
        }),
        (None, _) => None,
    };

    Ok(ApiKeyRecord {
        id: model.id,
        name: model.name,
        description: model.description,
        secret_hash: model.secret_hash,
        preview: model.preview,
        owner_id: model.owner_id,
        limits: ApiKeyLimits {
            requests_per_minute: to_u64(model.rate_limit_rpm),
            requests_per_day: to_u64(model.rate_limit_rpd),
            token_limit: to_u64(model.token_limit),
            concurrency_limit: to_u64(model.concurrency_limit),
            daily_cost_limit: model.daily_cost_limit,
            weekly_opus_cost_limit: model.weekly_opus_cost_limit,
        },
        restrictions: ApiKeyRestrictions {
            restrict_models: model.restrict_models,
            allowed_models: coerce_string_list(&model.allowed_models.into())?,
            restrict_clients: model.restrict_clients,
            allowed_clients: coerce_string_list(&model.allowed_clients.into())?,
        },
        activation: ActivationWindow {
            activates_at: model.activates_at.map(from_naive),
            expires_at: model.expires_at.map(from_naive),
        },
        // 未知状态按吊销处理，不给未知数据放行
        status: model.status.parse().unwrap_or(crate::types::ApiKeyStatus::Revoked),
        deleted,
        last_used_at: model.last_used_at.map(from_naive),
        created_at: from_naive(model.created_at),
        updated_at: from_naive(model.updated_at),
    })
}

fn to_active(record: &ApiKeyRecord) -> Result<api_keys::ActiveModel> {
    Ok(api_keys::ActiveModel {
        id: Set(record.id.clone()),
        name: Set(record.name.clone()),
        description: Set(record.description.clone()),
        secret_hash: Set(record.secret_hash.clone()),
        preview: Set(record.preview.clone()),
        owner_id: Set(record.owner_id.clone()),
        rate_limit_rpm: Set(to_i64(record.limits.requests_per_minute)),
        rate_limit_rpd: Set(to_i64(record.limits.requests_per_day)),
        token_limit: Set(to_i64(record.limits.token_limit)),
        concurrency_limit: Set(to_i64(record.limits.concurrency_limit)),
        daily_cost_limit: Set(record.limits.daily_cost_limit),
        weekly_opus_cost_limit: Set(record.limits.weekly_opus_cost_limit),
        restrict_models: Set(record.restrictions.restrict_models),
        allowed_models: Set(serde_json::to_string(&record.restrictions.allowed_models)?),
        restrict_clients: Set(record.restrictions.restrict_clients),
        allowed_clients: Set(serde_json::to_string(&record.restrictions.allowed_clients)?),
        activates_at: Set(record.activation.activates_at.map(to_naive)),
        expires_at: Set(record.activation.expires_at.map(to_naive)),
        status: Set(record.status.as_str().to_string()),
        deleted_by: Set(record.deleted.as_ref().map(|d| d.deleted_by.clone())),
        deleted_at: Set(record.deleted.as_ref().map(|d| to_naive(d.deleted_at))),
        last_used_at: Set(record.last_used_at.map(to_naive)),
        created_at: Set(to_naive(record.created_at)),
        updated_at: Set(to_naive(record.updated_at)),
    })
}

#[async_trait]
impl ApiKeyRepo for DurableStore {
    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(to_record)
            .transpose()
    }

    async fn upsert_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        // 单条语句完成插入或覆盖；secret_hash 唯一索引冲突映射为 Conflict
        Entity::insert(to_active(record)?)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns(Column::iter().filter(|c| !matches!(c, Column::Id | Column::CreatedAt)))
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_api_key(&self, id: &str) -> Result<bool> {
        let result = Entity::delete_by_id(id.to_string()).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_record)
            .collect()
    }

    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>> {
        Entity::find()
            .filter(Column::SecretHash.eq(secret_hash))
            .filter(Column::DeletedAt.is_null())
            .one(&self.db)
            .await?
            .map(to_record)
            .transpose()
    }
}
