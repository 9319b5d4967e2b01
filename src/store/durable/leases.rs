use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, TransactionTrait,
    sea_query::{Expr, OnConflict},
};

use entity::concurrency_leases::{self, Column, Entity};

use super::{DurableStore, ttl_millis};
use crate::error::Result;
use crate::store::traits::LeaseRepo;

async fn purge_expired<C: ConnectionTrait>(conn: &C, owner: &str, now_ms: i64) -> Result<()> {
    Entity::delete_many()
        .filter(Column::OwnerId.eq(owner))
        .filter(Column::ExpiresAt.lte(now_ms))
        .exec(conn)
        .await?;
    Ok(())
}

async fn count_live<C: ConnectionTrait>(conn: &C, owner: &str, now_ms: i64) -> Result<u64> {
    Ok(Entity::find()
        .filter(Column::OwnerId.eq(owner))
        .filter(Column::ExpiresAt.gt(now_ms))
        .count(conn)
        .await?)
}

#[async_trait]
impl LeaseRepo for DurableStore {
    async fn acquire_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let txn = self.db.begin().await?;

        purge_expired(&txn, owner, now_ms).await?;
        let lease = concurrency_leases::ActiveModel {
            id: NotSet,
            owner_id: Set(owner.to_string()),
            request_id: Set(request_id.to_string()),
            expires_at: Set(now_ms + ttl_millis(ttl)),
        };
        Entity::insert(lease)
            .on_conflict(
                OnConflict::columns([Column::OwnerId, Column::RequestId])
                    .update_column(Column::ExpiresAt)
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        let count = count_live(&txn, owner, now_ms).await?;

        txn.commit().await?;
        Ok(count)
    }

    async fn renew_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let txn = self.db.begin().await?;

        purge_expired(&txn, owner, now_ms).await?;
        Entity::update_many()
            .col_expr(Column::ExpiresAt, Expr::value(now_ms + ttl_millis(ttl)))
            .filter(Column::OwnerId.eq(owner))
            .filter(Column::RequestId.eq(request_id))
            .exec(&txn)
            .await?;
        let count = count_live(&txn, owner, now_ms).await?;

        txn.commit().await?;
        Ok(count)
    }

    async fn release_lease(&self, owner: &str, request_id: &str) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        let txn = self.db.begin().await?;

        Entity::delete_many()
            .filter(Column::OwnerId.eq(owner))
            .filter(Column::RequestId.eq(request_id))
            .exec(&txn)
            .await?;
        purge_expired(&txn, owner, now_ms).await?;
        let count = count_live(&txn, owner, now_ms).await?;

        txn.commit().await?;
        Ok(count)
    }

    async fn lease_count(&self, owner: &str) -> Result<u64> {
        let now_ms = Utc::now().timestamp_millis();
        purge_expired(&self.db, owner, now_ms).await?;
        count_live(&self.db, owner, now_ms).await
    }
}
