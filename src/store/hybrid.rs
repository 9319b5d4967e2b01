//! # 混合存储
//!
//! 持久存储是 API 密钥、账号和请求明细的权威来源，临时存储承担会话、
//! 粘性映射、租约和计数器。读缓存在未命中时回源并回填，写入后删除缓存，
//! 从不写穿。缓存路径的故障只记告警；持久存储的故障照常向上传播。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::codec::{decode, decode_account, encode, encode_account};
use super::durable::DurableStore;
use super::ephemeral::{CacheFamily, EphemeralStore, KvBackend, KvKey};
use super::mirror::MirrorQueue;
use super::traits::{
    AccountRepo, ApiKeyRepo, CostRepo, LeaseRepo, SessionRepo, StickyRepo, StoreAdapter,
    UsageRecordRepo, UsageRepo,
};
use crate::config::StorageConfig;
use crate::error::Result;
use crate::types::{
    ApiKeyRecord, CleanupReport, CostBucketKey, CostIncrement, Principal, ProviderAccountRecord,
    SessionKind, SessionRecord, StickySessionMapping, SystemStats, UsageBucketKey, UsageCounters,
    UsageIncrement, UsageRecord,
};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 混合存储
#[derive(Debug)]
pub struct HybridStore {
    durable: Arc<DurableStore>,
    ephemeral: EphemeralStore,
    mirror: MirrorQueue,
    api_key_ttl: Duration,
    account_ttl: Duration,
}

impl HybridStore {
    /// 组装并启动镜像任务，需要在 tokio 运行时内调用
    #[must_use]
    pub fn new(durable: DurableStore, ephemeral: EphemeralStore, storage: &StorageConfig) -> Self {
        let durable = Arc::new(durable);
        let mirror = MirrorQueue::spawn(durable.clone(), storage.mirror_queue_capacity);
        Self {
            durable,
            ephemeral,
            mirror,
            api_key_ttl: Duration::from_secs(storage.api_key_cache_ttl_secs.max(1)),
            account_ttl: Duration::from_secs(storage.account_cache_ttl_secs.max(1)),
        }
    }

    #[must_use]
    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }

    #[must_use]
    pub const fn ephemeral(&self) -> &EphemeralStore {
        &self.ephemeral
    }

    /// 镜像队列累计丢弃的增量数
    #[must_use]
    pub fn mirror_dropped(&self) -> u64 {
        self.mirror.dropped()
    }

    fn kv(&self) -> &KvBackend {
        self.ephemeral.kv()
    }

    async fn cache_get(&self, family: CacheFamily, id: &str) -> Option<String> {
        match self.kv().get(&KvKey::Cache(family, id).to_string()).await {
            Ok(hit) => hit,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Hybrid,
                    "cache_read_failed",
                    &format!("缓存读取失败，回源持久存储: {e}"),
                    family = family.as_str()
                );
                None
            }
        }
    }

    async fn cache_put(&self, family: CacheFamily, id: &str, value: &str, ttl: Duration) {
        let key = KvKey::Cache(family, id).to_string();
        if let Err(e) = self.kv().set(&key, value, Some(ttl)).await {
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Hybrid,
                "cache_fill_failed",
                &format!("缓存回填失败: {e}"),
                family = family.as_str()
            );
        }
    }

    async fn invalidate(&self, family: CacheFamily, id: &str) {
        let key = KvKey::Cache(family, id).to_string();
        if let Err(e) = self.kv().delete(&key).await {
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Hybrid,
                "cache_invalidate_failed",
                &format!("缓存失效失败，等待 TTL 过期: {e}"),
                family = family.as_str()
            );
        }
    }

    async fn invalidate_api_key(&self, id: &str, hashes: &[&str]) {
        self.invalidate(CacheFamily::ApiKey, id).await;
        for hash in hashes {
            self.invalidate(CacheFamily::ApiKeyHash, hash).await;
        }
    }

    async fn cache_api_key(&self, record: &ApiKeyRecord) {
        match encode(record) {
            Ok(raw) => {
                self.cache_put(CacheFamily::ApiKey, &record.id, &raw, self.api_key_ttl)
                    .await;
            }
            Err(e) => lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Hybrid,
                "cache_encode_failed",
                &format!("API 密钥序列化失败，跳过缓存: {e}")
            ),
        }
    }
}

#[async_trait]
impl ApiKeyRepo for HybridStore {
    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        if let Some(raw) = self.cache_get(CacheFamily::ApiKey, id).await {
            match decode::<ApiKeyRecord>(&raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Cache,
                        LogComponent::Hybrid,
                        "cache_decode_failed",
                        &format!("缓存条目损坏，已丢弃: {e}"),
                        api_key_id = id
                    );
                    self.invalidate(CacheFamily::ApiKey, id).await;
                }
            }
        }

        let record = self.durable.get_api_key(id).await?;
        if let Some(record) = &record {
            self.cache_api_key(record).await;
        }
        Ok(record)
    }

    async fn upsert_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let previous = self.durable.get_api_key(&record.id).await?;
        self.durable.upsert_api_key(record).await?;

        let mut hashes = vec![record.secret_hash.as_str()];
        if let Some(previous) = &previous {
            if previous.secret_hash != record.secret_hash {
                hashes.push(previous.secret_hash.as_str());
            }
        }
        self.invalidate_api_key(&record.id, &hashes).await;
        Ok(())
    }

    async fn delete_api_key(&self, id: &str) -> Result<bool> {
        let previous = self.durable.get_api_key(id).await?;
        let deleted = self.durable.delete_api_key(id).await?;
        let hashes: Vec<&str> = previous.iter().map(|p| p.secret_hash.as_str()).collect();
        self.invalidate_api_key(id, &hashes).await;
        Ok(deleted)
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        self.durable.list_api_keys().await
    }

    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>> {
        if let Some(id) = self.cache_get(CacheFamily::ApiKeyHash, secret_hash).await {
            // 索引可能指向已轮换的记录，必须核对哈希
            if let Some(record) = self.get_api_key(&id).await? {
                if record.secret_hash == secret_hash && !record.is_deleted() {
                    return Ok(Some(record));
                }
            }
            self.invalidate(CacheFamily::ApiKeyHash, secret_hash).await;
        }

        let record = self.durable.find_api_key_by_hash(secret_hash).await?;
        if let Some(record) = &record {
            self.cache_put(
                CacheFamily::ApiKeyHash,
                secret_hash,
                &record.id,
                self.api_key_ttl,
            )
            .await;
            self.cache_api_key(record).await;
        }
        Ok(record)
    }
}

#[async_trait]
impl AccountRepo for HybridStore {
    async fn get_account(&self, id: &str) -> Result<Option<ProviderAccountRecord>> {
        let cipher = self.durable.cipher();
        if let Some(raw) = self.cache_get(CacheFamily::Account, id).await {
            match decode_account(cipher, &raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Cache,
                        LogComponent::Hybrid,
                        "cache_decode_failed",
                        &format!("缓存条目损坏，已丢弃: {e}"),
                        account_id = id
                    );
                    self.invalidate(CacheFamily::Account, id).await;
                }
            }
        }

        let record = self.durable.get_account(id).await?;
        if let Some(record) = &record {
            match encode_account(cipher, record) {
                Ok(raw) => {
                    self.cache_put(CacheFamily::Account, id, &raw, self.account_ttl)
                        .await;
                }
                Err(e) => lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Hybrid,
                    "cache_encode_failed",
                    &format!("账号加密封装失败，跳过缓存: {e}"),
                    account_id = id
                ),
            }
        }
        Ok(record)
    }

    async fn upsert_account(&self, record: &ProviderAccountRecord) -> Result<()> {
        self.durable.upsert_account(record).await?;
        self.invalidate(CacheFamily::Account, &record.id).await;
        Ok(())
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        let deleted = self.durable.delete_account(id).await?;
        self.invalidate(CacheFamily::Account, id).await;
        Ok(deleted)
    }

    async fn list_accounts(&self) -> Result<Vec<ProviderAccountRecord>> {
        self.durable.list_accounts().await
    }
}

#[async_trait]
impl SessionRepo for HybridStore {
    async fn set_session(&self, kind: SessionKind, record: &SessionRecord) -> Result<()> {
        self.ephemeral.set_session(kind, record).await
    }

    async fn get_session(&self, kind: SessionKind, id: &str) -> Result<Option<SessionRecord>> {
        self.ephemeral.get_session(kind, id).await
    }

    async fn delete_session(&self, kind: SessionKind, id: &str) -> Result<bool> {
        self.ephemeral.delete_session(kind, id).await
    }
}

#[async_trait]
impl StickyRepo for HybridStore {
    async fn set_sticky(&self, mapping: &StickySessionMapping) -> Result<()> {
        self.ephemeral.set_sticky(mapping).await
    }

    async fn get_sticky(&self, fingerprint: &str) -> Result<Option<StickySessionMapping>> {
        self.ephemeral.get_sticky(fingerprint).await
    }

    async fn touch_sticky(&self, fingerprint: &str) -> Result<bool> {
        self.ephemeral.touch_sticky(fingerprint).await
    }

    async fn delete_sticky(&self, fingerprint: &str) -> Result<bool> {
        self.ephemeral.delete_sticky(fingerprint).await
    }
}

#[async_trait]
impl LeaseRepo for HybridStore {
    async fn acquire_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        self.ephemeral.acquire_lease(owner, request_id, ttl).await
    }

    async fn renew_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64> {
        self.ephemeral.renew_lease(owner, request_id, ttl).await
    }

    async fn release_lease(&self, owner: &str, request_id: &str) -> Result<u64> {
        self.ephemeral.release_lease(owner, request_id).await
    }

    async fn lease_count(&self, owner: &str) -> Result<u64> {
        self.ephemeral.lease_count(owner).await
    }
}

#[async_trait]
impl UsageRepo for HybridStore {
    async fn increment_usage(&self, increment: &UsageIncrement) -> Result<()> {
        self.ephemeral.increment_usage(increment).await?;
        self.mirror.enqueue_usage(increment.clone());
        Ok(())
    }

    /// 计数只增不减，两份副本逐字段取较大值。临时存储被清空后重新累加的桶
    /// 小于持久汇总，此时以持久存储为准
    async fn get_usage(
        &self,
        principal: &Principal,
        bucket: &UsageBucketKey,
    ) -> Result<Option<UsageCounters>> {
        let ephemeral = self.ephemeral.get_usage(principal, bucket).await?;
        let durable = self.durable.get_usage(principal, bucket).await?;
        Ok(match (ephemeral, durable) {
            (Some(mut counters), Some(durable)) => {
                counters.max_with(&durable);
                Some(counters)
            }
            (ephemeral, durable) => ephemeral.or(durable),
        })
    }
}

#[async_trait]
impl CostRepo for HybridStore {
    async fn increment_cost(&self, increment: &CostIncrement) -> Result<()> {
        self.ephemeral.increment_cost(increment).await?;
        self.mirror.enqueue_cost(increment.clone());
        Ok(())
    }

    async fn get_cost(&self, principal: &Principal, bucket: &CostBucketKey) -> Result<Option<f64>> {
        let ephemeral = self.ephemeral.get_cost(principal, bucket).await?;
        let durable = self.durable.get_cost(principal, bucket).await?;
        Ok(match (ephemeral, durable) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (ephemeral, durable) => ephemeral.or(durable),
        })
    }
}

#[async_trait]
impl UsageRecordRepo for HybridStore {
    async fn append_usage_record(&self, principal: &Principal, record: &UsageRecord) -> Result<()> {
        self.durable.append_usage_record(principal, record).await?;
        if let Err(e) = self.ephemeral.append_usage_record(principal, record).await {
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Hybrid,
                "recent_records_push_failed",
                &format!("最近明细写入临时存储失败: {e}"),
                principal = %principal
            );
        }
        Ok(())
    }

    async fn recent_usage_records(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        match self.durable.recent_usage_records(principal, limit).await {
            Ok(records) if !records.is_empty() => Ok(records),
            Ok(_) => self.ephemeral.recent_usage_records(principal, limit).await,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Db,
                    LogComponent::Hybrid,
                    "recent_records_fallback",
                    &format!("持久存储读取明细失败，改读临时存储: {e}"),
                    principal = %principal
                );
                self.ephemeral.recent_usage_records(principal, limit).await
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for HybridStore {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn kv_backend(&self) -> Option<KvBackend> {
        Some(self.kv().clone())
    }

    async fn ping(&self) -> Result<()> {
        self.durable.ping().await?;
        self.ephemeral.ping().await
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        let durable = self.durable.cleanup().await?;
        let ephemeral = self.ephemeral.cleanup().await?;
        Ok(CleanupReport {
            sessions: durable.sessions + ephemeral.sessions,
            oauth_sessions: durable.oauth_sessions + ephemeral.oauth_sessions,
            sticky_sessions: durable.sticky_sessions + ephemeral.sticky_sessions,
            leases: durable.leases + ephemeral.leases,
            usage_records: durable.usage_records + ephemeral.usage_records,
        })
    }

    /// 先等镜像队列排空，避免清空后又被迟到的增量写回
    async fn reset_all_usage_stats(&self) -> Result<u64> {
        self.mirror.flush().await?;
        let ephemeral = self.ephemeral.reset_all_usage_stats().await?;
        let durable = self.durable.reset_all_usage_stats().await?;
        linfo!(
            "system",
            LogStage::Metering,
            LogComponent::Hybrid,
            "reset_usage",
            "全部使用量统计已清空",
            ephemeral_buckets = ephemeral,
            durable_buckets = durable
        );
        Ok(ephemeral + durable)
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        self.durable.system_stats().await
    }

    async fn flush(&self) -> Result<()> {
        self.mirror.flush().await
    }

    async fn shutdown(&self) -> Result<()> {
        ldebug!(
            "system",
            LogStage::Shutdown,
            LogComponent::Hybrid,
            "shutdown",
            "正在关闭混合存储"
        );
        self.mirror.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::{hybrid_store, sample_account, sample_api_key};
    use crate::types::{Granularity, UsageBucketKey};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_update_invalidates_cached_api_key() {
        let store = hybrid_store().await;
        let mut key = sample_api_key("k1", "hash-1");
        key.limits.requests_per_minute = 10;
        store.upsert_api_key(&key).await.unwrap();

        let cached = store.get_api_key("k1").await.unwrap().unwrap();
        assert_eq!(cached.limits.requests_per_minute, 10);
        assert!(store.kv().get("cache:api_key:k1").await.unwrap().is_some());

        key.limits.requests_per_minute = 20;
        store.upsert_api_key(&key).await.unwrap();
        assert!(store.kv().get("cache:api_key:k1").await.unwrap().is_none());

        let fresh = store.get_api_key("k1").await.unwrap().unwrap();
        assert_eq!(fresh.limits.requests_per_minute, 20);
    }

    #[tokio::test]
    async fn test_rotation_drops_old_hash_mapping() {
        let store = hybrid_store().await;
        let mut key = sample_api_key("k1", "hash-old");
        store.upsert_api_key(&key).await.unwrap();
        assert!(store.find_api_key_by_hash("hash-old").await.unwrap().is_some());

        key.secret_hash = "hash-new".to_string();
        store.upsert_api_key(&key).await.unwrap();

        assert!(store.find_api_key_by_hash("hash-old").await.unwrap().is_none());
        assert_eq!(
            store.find_api_key_by_hash("hash-new").await.unwrap().unwrap().id,
            "k1"
        );
    }

    #[tokio::test]
    async fn test_account_cache_is_sealed() {
        let store = hybrid_store().await;
        let account = sample_account("acc-1");
        store.upsert_account(&account).await.unwrap();

        let loaded = store.get_account("acc-1").await.unwrap().unwrap();
        assert_eq!(loaded, account);

        let raw = store.kv().get("cache:account:acc-1").await.unwrap().unwrap();
        assert!(!raw.contains("sk-test-secret"));
    }

    #[tokio::test]
    async fn test_usage_mirrored_and_read_back_after_flush_of_ephemeral() {
        let store = hybrid_store().await;
        let principal = Principal::api_key("k1");
        let total = UsageBucketKey::total();
        let increment = UsageIncrement {
            principal: principal.clone(),
            buckets: vec![total.clone()],
            delta: UsageCounters {
                requests: 1,
                input_tokens: 100,
                output_tokens: 50,
                all_tokens: 150,
                ..UsageCounters::default()
            },
        };
        store.increment_usage(&increment).await.unwrap();
        store.flush().await.unwrap();

        let mirrored = store.durable().get_usage(&principal, &total).await.unwrap();
        assert_eq!(mirrored.unwrap().all_tokens, 150);

        // 模拟临时存储被清空
        store.kv().delete_prefix("usage:").await.unwrap();
        let fallback = store.get_usage(&principal, &total).await.unwrap().unwrap();
        assert_eq!(fallback.all_tokens, 150);

        let daily = UsageBucketKey::new("*", Granularity::Day, "1999-01-01");
        assert!(store.get_usage(&principal, &daily).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_traffic_after_ephemeral_loss_keeps_durable_total() {
        let store = hybrid_store().await;
        let principal = Principal::api_key("k1");
        let total = UsageBucketKey::total();
        let increment = |tokens: i64| UsageIncrement {
            principal: principal.clone(),
            buckets: vec![total.clone()],
            delta: UsageCounters {
                requests: 1,
                all_tokens: tokens,
                ..UsageCounters::default()
            },
        };

        store.increment_usage(&increment(150)).await.unwrap();
        store.flush().await.unwrap();
        store.kv().delete_prefix("usage:").await.unwrap();

        store.increment_usage(&increment(10)).await.unwrap();
        store.flush().await.unwrap();

        let counters = store.get_usage(&principal, &total).await.unwrap().unwrap();
        assert_eq!(counters.all_tokens, 160);
        assert_eq!(counters.requests, 2);
    }

    #[tokio::test]
    async fn test_cost_after_ephemeral_loss_keeps_durable_total() {
        let store = hybrid_store().await;
        let principal = Principal::api_key("k1");
        let bucket = CostBucketKey::new(crate::types::CostPeriod::Total, "all");
        let increment = |amount: f64| CostIncrement {
            principal: principal.clone(),
            buckets: vec![bucket.clone()],
            amount,
        };

        store.increment_cost(&increment(2.0)).await.unwrap();
        store.flush().await.unwrap();
        store.kv().delete_prefix("cost:").await.unwrap();
        store.increment_cost(&increment(0.5)).await.unwrap();
        store.flush().await.unwrap();

        assert_eq!(store.get_cost(&principal, &bucket).await.unwrap(), Some(2.5));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let store = hybrid_store().await;
        store.shutdown().await.unwrap();
        store.shutdown().await.unwrap();
    }
}
