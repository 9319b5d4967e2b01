//! # 临时存储
//!
//! 基于键值后端（Redis 或进程内）的实现。记录以 JSON 文本保存，
//! 计数器使用哈希字段原子累加，租约使用按过期时刻排序的集合。

mod backend;
pub mod keys;
mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

pub use backend::KvBackend;
pub use keys::{CacheFamily, KvKey};
pub use memory::MemoryKv;
pub use self::redis::RedisKv;

use self::keys::prefix;
use super::codec::{decode, decode_account, encode, encode_account};
use super::traits::{
    AccountRepo, ApiKeyRepo, CostRepo, LeaseRepo, SessionRepo, StickyRepo, StoreAdapter,
    UsageRecordRepo, UsageRepo,
};
use crate::config::{SecretCipher, StorageConfig};
use crate::error::{Result, StoreError};
use crate::types::conversion::parse_f64_str;
use crate::types::timezone::expires_after;
use crate::types::{
    AccountStatus, ApiKeyRecord, ApiKeyStatus, CleanupReport, CostBucketKey, CostIncrement,
    Principal, ProviderAccountRecord, SessionKind, SessionRecord, StickySessionMapping,
    SystemStats, UsageBucketKey, UsageCounters, UsageIncrement, UsageRecord,
};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 临时存储
#[derive(Debug, Clone)]
pub struct EphemeralStore {
    kv: KvBackend,
    cipher: SecretCipher,
    record_limit: usize,
}

/// 距离 `expires_at` 的剩余时间，已过期返回 `None`
fn remaining(expires_at: chrono::DateTime<Utc>) -> Option<Duration> {
    (expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

impl EphemeralStore {
    #[must_use]
    pub fn new(kv: KvBackend, cipher: SecretCipher, storage: &StorageConfig) -> Self {
        Self {
            kv,
            cipher,
            record_limit: storage.ephemeral_usage_record_limit.max(1),
        }
    }

    #[must_use]
    pub const fn kv(&self) -> &KvBackend {
        &self.kv
    }

    /// 读取一族记录，无法解析的条目记录日志后跳过
    async fn load_family<T: Send>(
        &self,
        family: &str,
        parse: impl Fn(&str) -> Result<T> + Send + Sync,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for key in self.kv.scan_prefix(family).await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match parse(&raw) {
                Ok(item) => items.push(item),
                Err(e) => lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Cache,
                    "skip_corrupt_entry",
                    &format!("跳过无法解析的条目: {e}"),
                    key = key.as_str()
                ),
            }
        }
        Ok(items)
    }

    /// 清理所有 owner 的过期租约，返回被清空的租约集合数
    async fn purge_all_leases(&self) -> Result<u64> {
        let mut emptied = 0;
        for key in self.kv.scan_prefix(prefix::CONCURRENCY).await? {
            let live = self.kv.zset_count(&key).await?;
            if live == 0 {
                self.kv.delete(&key).await?;
                emptied += 1;
            } else {
                ldebug!(
                    "system",
                    LogStage::Cleanup,
                    LogComponent::Lease,
                    "leases_in_use",
                    "租约集合仍有有效成员",
                    owner = key.trim_start_matches(prefix::CONCURRENCY),
                    live = live
                );
            }
        }
        Ok(emptied)
    }
}

#[async_trait]
impl ApiKeyRepo for EphemeralStore {
    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        self.kv
            .get(&KvKey::ApiKey(id).to_string())
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    async fn upsert_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let index_key = KvKey::ApiKeyHash(&record.secret_hash).to_string();
        let previous = self.get_api_key(&record.id).await?;

        // 先占住哈希索引，保证哈希全局唯一
        if !self.kv.set_nx(&index_key, &record.id, None).await? {
            match self.kv.get(&index_key).await? {
                Some(owner) if owner != record.id => {
                    // 索引指向的密钥已不存在或已换哈希时允许接管
                    let stale = match self.get_api_key(&owner).await? {
                        Some(other) => other.secret_hash != record.secret_hash,
                        None => true,
                    };
                    if !stale {
                        return Err(StoreError::conflict("api_key", "secret_hash"));
                    }
                    self.kv.set(&index_key, &record.id, None).await?;
                }
                Some(_) => {}
                None => self.kv.set(&index_key, &record.id, None).await?,
            }
        }

        self.kv
            .set(&KvKey::ApiKey(&record.id).to_string(), &encode(record)?, None)
            .await?;

        if let Some(previous) = previous.filter(|p| p.secret_hash != record.secret_hash) {
            let old_key = KvKey::ApiKeyHash(&previous.secret_hash).to_string();
            self.kv
                .replace_index(&old_key, &index_key, &record.id, None)
                .await?;
        }
        Ok(())
    }

    async fn delete_api_key(&self, id: &str) -> Result<bool> {
        let Some(record) = self.get_api_key(id).await? else {
            return Ok(false);
        };
        let index_key = KvKey::ApiKeyHash(&record.secret_hash).to_string();
        if self.kv.get(&index_key).await?.as_deref() == Some(id) {
            self.kv.delete(&index_key).await?;
        }
        self.kv.delete(&KvKey::ApiKey(id).to_string()).await
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        let mut keys = self
            .load_family(prefix::API_KEY, |raw| decode::<ApiKeyRecord>(raw))
            .await?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>> {
        let Some(id) = self.kv.get(&KvKey::ApiKeyHash(secret_hash).to_string()).await? else {
            return Ok(None);
        };
        Ok(self
            .get_api_key(&id)
            .await?
            .filter(|r| r.secret_hash == secret_hash && !r.is_deleted()))
    }
}

#[async_trait]
impl AccountRepo for EphemeralStore {
    async fn get_account(&self, id: &str) -> Result<Option<ProviderAccountRecord>> {
        self.kv
            .get(&KvKey::Account(id).to_string())
            .await?
            .map(|raw| decode_account(&self.cipher, &raw))
            .transpose()
    }

    async fn upsert_account(&self, record: &ProviderAccountRecord) -> Result<()> {
        record.validate()?;
        let raw = encode_account(&self.cipher, record)?;
        self.kv
            .set(&KvKey::Account(&record.id).to_string(), &raw, None)
            .await
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        self.kv.delete(&KvKey::Account(id).to_string()).await
    }

    async fn list_accounts(&self) -> Result<Vec<ProviderAccountRecord>> {
        let cipher = &self.cipher;
        let mut accounts = self
            .load_family(prefix::ACCOUNT, |raw| decode_account(cipher, raw))
            .await?;
        accounts.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(accounts)
    }
}

#[async_trait]
impl SessionRepo for EphemeralStore {
    async fn set_session(&self, kind: SessionKind, record: &SessionRecord) -> Result<()> {
        let key = KvKey::Session(kind, &record.id).to_string();
        match remaining(record.expires_at) {
            Some(ttl) => self.kv.set(&key, &encode(record)?, Some(ttl)).await,
            None => self.kv.delete(&key).await.map(|_| ()),
        }
    }

    async fn get_session(&self, kind: SessionKind, id: &str) -> Result<Option<SessionRecord>> {
        let key = KvKey::Session(kind, id).to_string();
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let record: SessionRecord = decode(&raw)?;
        if record.expires_at <= Utc::now() {
            self.kv.delete(&key).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn delete_session(&self, kind: SessionKind, id: &str) -> Result<bool> {
        self.kv.delete(&KvKey::Session(kind, id).to_string()).await
    }
}

#[async_trait]
impl StickyRepo for EphemeralStore {
    async fn set_sticky(&self, mapping: &StickySessionMapping) -> Result<()> {
        let ttl = Duration::from_secs(mapping.ttl_secs.max(1));
        self.kv
            .set(
                &KvKey::Sticky(&mapping.fingerprint).to_string(),
                &encode(mapping)?,
                Some(ttl),
            )
            .await
    }

    async fn get_sticky(&self, fingerprint: &str) -> Result<Option<StickySessionMapping>> {
        self.kv
            .get(&KvKey::Sticky(fingerprint).to_string())
            .await?
            .map(|raw| decode(&raw))
            .transpose()
    }

    async fn touch_sticky(&self, fingerprint: &str) -> Result<bool> {
        let Some(mut mapping) = self.get_sticky(fingerprint).await? else {
            return Ok(false);
        };
        mapping.expires_at = expires_after(Utc::now(), mapping.ttl_secs.max(1));
        self.set_sticky(&mapping).await?;
        Ok(true)
    }

    async fn delete_sticky(&self, fingerprint: &str) -> Result<bool> {
        self.kv.delete(&KvKey::Sticky(fingerprint).to_string()).await
    }
}

#[async_trait]
impl LeaseRepo for EphemeralStore {
    async fn acquire_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        self.kv
            .zset_upsert(&KvKey::Concurrency(owner).to_string(), request_id, ttl)
            .await
    }

    async fn renew_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        self.kv
            .zset_update(&KvKey::Concurrency(owner).to_string(), request_id, ttl)
            .await
    }

    async fn release_lease(&self, owner: &str, request_id: &str) -> Result<u64> {
        self.kv
            .zset_remove(&KvKey::Concurrency(owner).to_string(), request_id)
            .await
    }

    async fn lease_count(&self, owner: &str) -> Result<u64> {
        self.kv
            .zset_count(&KvKey::Concurrency(owner).to_string())
            .await
    }
}

#[async_trait]
impl UsageRepo for EphemeralStore {
    async fn increment_usage(&self, increment: &UsageIncrement) -> Result<()> {
        let fields: Vec<(&str, i64)> = increment.delta.non_zero().collect();
        if fields.is_empty() || increment.buckets.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = increment
            .buckets
            .iter()
            .map(|b| KvKey::Usage(&increment.principal, b).to_string())
            .collect();
        self.kv.hincr_many(&keys, &fields).await
    }

    async fn get_usage(
        &self,
        principal: &Principal,
        bucket: &UsageBucketKey,
    ) -> Result<Option<UsageCounters>> {
        let hash = self
            .kv
            .hgetall(&KvKey::Usage(principal, bucket).to_string())
            .await?;
        Ok((!hash.is_empty()).then(|| UsageCounters::from_hash(&hash)))
    }
}

#[async_trait]
impl CostRepo for EphemeralStore {
    async fn increment_cost(&self, increment: &CostIncrement) -> Result<()> {
        if increment.buckets.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = increment
            .buckets
            .iter()
            .map(|b| KvKey::Cost(&increment.principal, b).to_string())
            .collect();
        self.kv.incr_float_many(&keys, increment.amount).await
    }

    async fn get_cost(&self, principal: &Principal, bucket: &CostBucketKey) -> Result<Option<f64>> {
        self.kv
            .get(&KvKey::Cost(principal, bucket).to_string())
            .await?
            .map(|raw| parse_f64_str(&raw).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl UsageRecordRepo for EphemeralStore {
    async fn append_usage_record(&self, principal: &Principal, record: &UsageRecord) -> Result<()> {
        self.kv
            .lpush_trim(
                &KvKey::UsageRecords(principal).to_string(),
                &encode(record)?,
                self.record_limit,
            )
            .await
    }

    async fn recent_usage_records(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        self.kv
            .lrange(&KvKey::UsageRecords(principal).to_string(), limit)
            .await?
            .iter()
            .map(|raw| decode(raw))
            .collect()
    }
}

#[async_trait]
impl StoreAdapter for EphemeralStore {
    fn name(&self) -> &'static str {
        "ephemeral"
    }

    fn kv_backend(&self) -> Option<KvBackend> {
        Some(self.kv.clone())
    }

    async fn ping(&self) -> Result<()> {
        self.kv.ping().await
    }

    /// 会话、映射和明细由 TTL 与裁剪自动回收，这里只处理租约集合
    async fn cleanup(&self) -> Result<CleanupReport> {
        let report = CleanupReport {
            leases: self.purge_all_leases().await?,
            ..CleanupReport::default()
        };
        linfo!(
            "system",
            LogStage::Cleanup,
            LogComponent::Cache,
            "cleanup",
            "临时存储过期数据清理完成",
            backend = self.kv.kind(),
            removed = report.total()
        );
        Ok(report)
    }

    async fn reset_all_usage_stats(&self) -> Result<u64> {
        let usage = self.kv.delete_prefix(prefix::USAGE).await?;
        let cost = self.kv.delete_prefix(prefix::COST).await?;
        Ok(usage + cost)
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let keys = self.list_api_keys().await?;
        let accounts = self.list_accounts().await?;
        Ok(SystemStats {
            api_keys: keys.len() as u64,
            active_api_keys: keys
                .iter()
                .filter(|k| k.status == ApiKeyStatus::Active && !k.is_deleted())
                .count() as u64,
            accounts: accounts.len() as u64,
            schedulable_accounts: accounts
                .iter()
                .filter(|a| a.schedulable && a.status == AccountStatus::Active)
                .count() as u64,
        })
    }
}

#[cfg(test)]
mod tests;
