use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict},
};

use entity::{cost_stats, usage_records, usage_stats};

use super::DurableStore;
use crate::error::Result;
use crate::store::traits::{CostRepo, UsageRecordRepo, UsageRepo};
use crate::types::timezone::{from_naive, to_naive};
use crate::types::{
    CostBucketKey, CostIncrement, Principal, UsageBucketKey, UsageCounters, UsageIncrement,
    UsageRecord,
};

/// 与 `UsageCounters::FIELDS` 顺序一致
const COUNTER_COLUMNS: [usage_stats::Column; 11] = [
    usage_stats::Column::Requests,
    usage_stats::Column::InputTokens,
    usage_stats::Column::OutputTokens,
    usage_stats::Column::CacheCreateTokens,
    usage_stats::Column::CacheReadTokens,
    usage_stats::Column::Ephemeral5mTokens,
    usage_stats::Column::Ephemeral1hTokens,
    usage_stats::Column::AllTokens,
    usage_stats::Column::LongContextInputTokens,
    usage_stats::Column::LongContextOutputTokens,
    usage_stats::Column::LongContextRequests,
];

fn counters_from_model(m: &usage_stats::Model) -> UsageCounters {
    UsageCounters {
        requests: m.requests,
        input_tokens: m.input_tokens,
        output_tokens: m.output_tokens,
        cache_create_tokens: m.cache_create_tokens,
        cache_read_tokens: m.cache_read_tokens,
        ephemeral_5m_tokens: m.ephemeral_5m_tokens,
        ephemeral_1h_tokens: m.ephemeral_1h_tokens,
        all_tokens: m.all_tokens,
        long_context_input_tokens: m.long_context_input_tokens,
        long_context_output_tokens: m.long_context_output_tokens,
        long_context_requests: m.long_context_requests,
    }
}

fn usage_row(principal: &Principal, key: &UsageBucketKey, d: &UsageCounters) -> usage_stats::ActiveModel {
    usage_stats::ActiveModel {
        id: NotSet,
        principal_id: Set(principal.id.clone()),
        principal_type: Set(principal.kind.as_str().to_string()),
        model: Set(key.model.clone()),
        granularity: Set(key.granularity.as_str().to_string()),
        bucket: Set(key.bucket.clone()),
        requests: Set(d.requests),
        input_tokens: Set(d.input_tokens),
        output_tokens: Set(d.output_tokens),
        cache_create_tokens: Set(d.cache_create_tokens),
        cache_read_tokens: Set(d.cache_read_tokens),
        ephemeral_5m_tokens: Set(d.ephemeral_5m_tokens),
        ephemeral_1h_tokens: Set(d.ephemeral_1h_tokens),
        all_tokens: Set(d.all_tokens),
        long_context_input_tokens: Set(d.long_context_input_tokens),
        long_context_output_tokens: Set(d.long_context_output_tokens),
        long_context_requests: Set(d.long_context_requests),
        updated_at: Set(to_naive(Utc::now())),
    }
}

/// `ON CONFLICT DO UPDATE SET col = usage_stats.col + delta`
fn usage_on_conflict(delta: &UsageCounters) -> OnConflict {
    let mut on_conflict = OnConflict::columns([
        usage_stats::Column::PrincipalId,
        usage_stats::Column::PrincipalType,
        usage_stats::Column::Model,
        usage_stats::Column::Granularity,
        usage_stats::Column::Bucket,
    ]);
    for (column, value) in COUNTER_COLUMNS.into_iter().zip(delta.values()) {
        on_conflict.value(column, Expr::col((usage_stats::Entity, column)).add(value));
    }
    on_conflict.update_column(usage_stats::Column::UpdatedAt);
    on_conflict
}

/// 明细表中主体的存储键，带上主体类型避免 id 撞车
fn record_owner(principal: &Principal) -> String {
    principal.to_string()
}

impl DurableStore {
    pub(super) async fn reset_counters(&self) -> Result<u64> {
        let txn = self.db.begin().await?;
        let usage = usage_stats::Entity::delete_many().exec(&txn).await?.rows_affected;
        let cost = cost_stats::Entity::delete_many().exec(&txn).await?.rows_affected;
        txn.commit().await?;
        Ok(usage + cost)
    }
}

#[async_trait]
impl UsageRepo for DurableStore {
    async fn increment_usage(&self, increment: &UsageIncrement) -> Result<()> {
        if increment.buckets.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin().await?;
        for key in &increment.buckets {
            usage_stats::Entity::insert(usage_row(&increment.principal, key, &increment.delta))
                .on_conflict(usage_on_conflict(&increment.delta))
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn get_usage(
        &self,
        principal: &Principal,
        bucket: &UsageBucketKey,
    ) -> Result<Option<UsageCounters>> {
        let row = usage_stats::Entity::find()
            .filter(usage_stats::Column::PrincipalId.eq(principal.id.as_str()))
            .filter(usage_stats::Column::PrincipalType.eq(principal.kind.as_str()))
            .filter(usage_stats::Column::Model.eq(bucket.model.as_str()))
            .filter(usage_stats::Column::Granularity.eq(bucket.granularity.as_str()))
            .filter(usage_stats::Column::Bucket.eq(bucket.bucket.as_str()))
            .one(&self.db)
            .await?;
        Ok(row.as_ref().map(counters_from_model))
    }
}

#[async_trait]
impl CostRepo for DurableStore {
    async fn increment_cost(&self, increment: &CostIncrement) -> Result<()> {
        if increment.buckets.is_empty() {
            return Ok(());
        }
        let now = to_naive(Utc::now());
        let txn = self.db.begin().await?;
        for key in &increment.buckets {
            let row = cost_stats::ActiveModel {
                id: NotSet,
                principal_id: Set(increment.principal.id.clone()),
                principal_type: Set(increment.principal.kind.as_str().to_string()),
                period: Set(key.period.as_str().to_string()),
                bucket: Set(key.bucket.clone()),
                amount: Set(increment.amount),
                updated_at: Set(now),
            };
            cost_stats::Entity::insert(row)
                .on_conflict(
                    OnConflict::columns([
                        cost_stats::Column::PrincipalId,
                        cost_stats::Column::PrincipalType,
                        cost_stats::Column::Period,
                        cost_stats::Column::Bucket,
                    ])
                    .value(
                        cost_stats::Column::Amount,
                        Expr::col((cost_stats::Entity, cost_stats::Column::Amount))
                            .add(increment.amount),
                    )
                    .update_column(cost_stats::Column::UpdatedAt)
                    .to_owned(),
                )
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn get_cost(&self, principal: &Principal, bucket: &CostBucketKey) -> Result<Option<f64>> {
        let row = cost_stats::Entity::find()
            .filter(cost_stats::Column::PrincipalId.eq(principal.id.as_str()))
            .filter(cost_stats::Column::PrincipalType.eq(principal.kind.as_str()))
            .filter(cost_stats::Column::Period.eq(bucket.period.as_str()))
            .filter(cost_stats::Column::Bucket.eq(bucket.bucket.as_str()))
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.amount))
    }
}

#[async_trait]
impl UsageRecordRepo for DurableStore {
    async fn append_usage_record(&self, principal: &Principal, record: &UsageRecord) -> Result<()> {
        let owner = record_owner(principal);
        let row = usage_records::ActiveModel {
            id: NotSet,
            principal_id: Set(owner.clone()),
            model: Set(record.model.clone()),
            endpoint: Set(record.endpoint.clone()),
            input_tokens: Set(record.input_tokens),
            output_tokens: Set(record.output_tokens),
            cache_tokens: Set(record.cache_tokens),
            cost: Set(record.cost),
            response_time_ms: Set(record.response_time_ms),
            status_code: Set(record.status_code),
            error: Set(record.error.clone()),
            metadata: Set(serde_json::to_string(&record.metadata)?),
            created_at: Set(to_naive(record.created_at)),
        };

        let txn = self.db.begin().await?;
        usage_records::Entity::insert(row)
            .exec_without_returning(&txn)
            .await?;

        // 超出保留条数的旧记录一并删除
        let cutoff = usage_records::Entity::find()
            .select_only()
            .column(usage_records::Column::Id)
            .filter(usage_records::Column::PrincipalId.eq(owner.as_str()))
            .order_by_desc(usage_records::Column::Id)
            .offset(self.usage_record_limit as u64)
            .limit(1)
            .into_tuple::<i32>()
            .one(&txn)
            .await?;
        if let Some(cutoff) = cutoff {
            usage_records::Entity::delete_many()
                .filter(usage_records::Column::PrincipalId.eq(owner.as_str()))
                .filter(usage_records::Column::Id.lte(cutoff))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn recent_usage_records(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        let rows = usage_records::Entity::find()
            .filter(usage_records::Column::PrincipalId.eq(record_owner(principal)))
            .order_by_desc(usage_records::Column::Id)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        rows.into_iter()
            .map(|r| {
                Ok(UsageRecord {
                    metadata: if r.metadata.is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::from_str(&r.metadata)?
                    },
                    model: r.model,
                    endpoint: r.endpoint,
                    input_tokens: r.input_tokens,
                    output_tokens: r.output_tokens,
                    cache_tokens: r.cache_tokens,
                    cost: r.cost,
                    response_time_ms: r.response_time_ms,
                    status_code: r.status_code,
                    error: r.error,
                    created_at: from_naive(r.created_at),
                })
            })
            .collect()
    }
}
