//! # 持久存储
//!
//! 基于 sea-orm 的关系型实现，支持 SQLite（默认）、MySQL 和 PostgreSQL。
//! 表结构由 `migration::Migrator` 创建，每个实体族一张表。

mod accounts;
mod api_keys;
mod leases;
mod sessions;
mod usage;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};

use entity::{
    api_keys as api_key_entity, concurrency_leases, oauth_sessions, provider_accounts,
    sessions as session_entity, sticky_sessions, usage_records,
};

use super::ephemeral::KvBackend;
use super::traits::StoreAdapter;
use crate::config::{SecretCipher, StorageConfig};
use crate::error::{Context, Result};
use crate::types::{CleanupReport, SystemStats, timezone::to_naive};
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};

/// 持久存储
#[derive(Debug, Clone)]
pub struct DurableStore {
    db: DatabaseConnection,
    cipher: SecretCipher,
    usage_record_limit: usize,
    retention: chrono::Duration,
}

impl DurableStore {
    #[must_use]
    pub fn new(db: DatabaseConnection, cipher: SecretCipher, storage: &StorageConfig) -> Self {
        Self {
            db,
            cipher,
            usage_record_limit: storage.durable_usage_record_limit.max(1),
            retention: chrono::Duration::days(storage.usage_record_retention_days.max(1)),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub(crate) const fn cipher(&self) -> &SecretCipher {
        &self.cipher
    }
}

/// 秒级 TTL 转毫秒
pub(crate) fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub(crate) fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[async_trait]
impl StoreAdapter for DurableStore {
    fn name(&self) -> &'static str {
        "durable"
    }

    fn kv_backend(&self) -> Option<KvBackend> {
        None
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await.context("数据库不可达")
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let sessions = session_entity::Entity::delete_many()
            .filter(session_entity::Column::ExpiresAt.lte(now_ms))
            .exec(&self.db)
            .await?
            .rows_affected;
        let oauth_sessions = oauth_sessions::Entity::delete_many()
            .filter(oauth_sessions::Column::ExpiresAt.lte(now_ms))
            .exec(&self.db)
            .await?
            .rows_affected;
        let sticky_sessions = sticky_sessions::Entity::delete_many()
            .filter(sticky_sessions::Column::ExpiresAt.lte(now_ms))
            .exec(&self.db)
            .await?
            .rows_affected;
        let leases = concurrency_leases::Entity::delete_many()
            .filter(concurrency_leases::Column::ExpiresAt.lte(now_ms))
            .exec(&self.db)
            .await?
            .rows_affected;
        let usage_records = usage_records::Entity::delete_many()
            .filter(usage_records::Column::CreatedAt.lt(to_naive(now - self.retention)))
            .exec(&self.db)
            .await?
            .rows_affected;

        let report = CleanupReport {
            sessions,
            oauth_sessions,
            sticky_sessions,
            leases,
            usage_records,
        };
        linfo!(
            "system",
            LogStage::Cleanup,
            LogComponent::Database,
            "cleanup",
            "持久存储过期数据清理完成",
            removed = report.total()
        );
        Ok(report)
    }

    async fn reset_all_usage_stats(&self) -> Result<u64> {
        self.reset_counters().await
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let api_keys = api_key_entity::Entity::find().count(&self.db).await?;
        let active_api_keys = api_key_entity::Entity::find()
            .filter(api_key_entity::Column::Status.eq("active"))
            .filter(api_key_entity::Column::DeletedAt.is_null())
            .count(&self.db)
            .await?;
        let accounts = provider_accounts::Entity::find().count(&self.db).await?;
        let schedulable_accounts = provider_accounts::Entity::find()
            .filter(provider_accounts::Column::Schedulable.eq(true))
            .filter(provider_accounts::Column::Status.eq("active"))
            .count(&self.db)
            .await?;

        Ok(SystemStats {
            api_keys,
            active_api_keys,
            accounts,
            schedulable_accounts,
        })
    }
}

#[cfg(test)]
mod tests;
