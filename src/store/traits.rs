//! # 存储适配接口
//!
//! 每个实体族一个 trait，三种存储实现（持久、临时、混合）都实现全部 trait，
//! 调用方只依赖 `Arc<dyn StoreAdapter>`，从不按存储模式分支。
//!
//! 约定：不存在返回 `Ok(None)` / `Ok(false)`，不是错误；
//! `upsert` 幂等；计数器只通过原子累加修改。

use std::time::Duration;

use async_trait::async_trait;

use super::ephemeral::KvBackend;
use crate::error::Result;
use crate::types::{
    ApiKeyRecord, CleanupReport, CostBucketKey, CostIncrement, Principal, ProviderAccountRecord,
    SessionKind, SessionRecord, StickySessionMapping, SystemStats, UsageBucketKey, UsageCounters,
    UsageIncrement, UsageRecord,
};

/// API 密钥
#[async_trait]
pub trait ApiKeyRepo: Send + Sync {
    async fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>>;

    /// 写入或覆盖。`secret_hash` 与其他密钥冲突时返回 `Conflict`；
    /// 哈希变化时旧哈希立即失效
    async fn upsert_api_key(&self, record: &ApiKeyRecord) -> Result<()>;

    /// 物理删除
    async fn delete_api_key(&self, id: &str) -> Result<bool>;

    /// 全部密钥，包括软删除的
    async fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>>;

    /// 按哈希查找，软删除的密钥不可见
    async fn find_api_key_by_hash(&self, secret_hash: &str) -> Result<Option<ApiKeyRecord>>;
}

/// 上游账号
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn get_account(&self, id: &str) -> Result<Option<ProviderAccountRecord>>;

    async fn upsert_account(&self, record: &ProviderAccountRecord) -> Result<()>;

    async fn delete_account(&self, id: &str) -> Result<bool>;

    /// 按优先级降序、创建时间降序
    async fn list_accounts(&self) -> Result<Vec<ProviderAccountRecord>>;
}

/// 登录会话与 OAuth 握手会话
#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn set_session(&self, kind: SessionKind, record: &SessionRecord) -> Result<()>;

    /// 过期会话视为不存在
    async fn get_session(&self, kind: SessionKind, id: &str) -> Result<Option<SessionRecord>>;

    async fn delete_session(&self, kind: SessionKind, id: &str) -> Result<bool>;
}

/// 粘性会话映射
#[async_trait]
pub trait StickyRepo: Send + Sync {
    async fn set_sticky(&self, mapping: &StickySessionMapping) -> Result<()>;

    /// 过期映射被删除并返回 `None`
    async fn get_sticky(&self, fingerprint: &str) -> Result<Option<StickySessionMapping>>;

    /// 按映射自身的 TTL 重置过期时间
    async fn touch_sticky(&self, fingerprint: &str) -> Result<bool>;

    async fn delete_sticky(&self, fingerprint: &str) -> Result<bool>;
}

/// 并发租约。所有方法先清理该 owner 的过期租约，返回当前有效租约数
#[async_trait]
pub trait LeaseRepo: Send + Sync {
    async fn acquire_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64>;

    /// 只续期已存在的租约
    async fn renew_lease(&self, owner: &str, request_id: &str, ttl: Duration) -> Result<u64>;

    async fn release_lease(&self, owner: &str, request_id: &str) -> Result<u64>;

    async fn lease_count(&self, owner: &str) -> Result<u64>;
}

/// 使用量计数器
#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// 对每个桶原子累加同一组增量
    async fn increment_usage(&self, increment: &UsageIncrement) -> Result<()>;

    /// 桶不存在时返回 `None`，与全零计数区分
    async fn get_usage(
        &self,
        principal: &Principal,
        bucket: &UsageBucketKey,
    ) -> Result<Option<UsageCounters>>;
}

/// 费用计数器
#[async_trait]
pub trait CostRepo: Send + Sync {
    async fn increment_cost(&self, increment: &CostIncrement) -> Result<()>;

    async fn get_cost(&self, principal: &Principal, bucket: &CostBucketKey) -> Result<Option<f64>>;
}

/// 请求明细
#[async_trait]
pub trait UsageRecordRepo: Send + Sync {
    /// 追加并裁剪到保留条数
    async fn append_usage_record(&self, principal: &Principal, record: &UsageRecord) -> Result<()>;

    /// 最新的在前
    async fn recent_usage_records(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<UsageRecord>>;
}

/// 组合后的存储适配器
#[async_trait]
pub trait StoreAdapter:
    ApiKeyRepo
    + AccountRepo
    + SessionRepo
    + StickyRepo
    + LeaseRepo
    + UsageRepo
    + CostRepo
    + UsageRecordRepo
{
    /// 实现名称：`durable` / `ephemeral` / `hybrid`
    fn name(&self) -> &'static str;

    /// 可供限流器复用的临时存储后端
    fn kv_backend(&self) -> Option<KvBackend>;

    async fn ping(&self) -> Result<()>;

    /// 删除过期的会话、映射、租约和明细
    async fn cleanup(&self) -> Result<CleanupReport>;

    /// 清空全部使用量与费用计数器，返回删除的桶数
    async fn reset_all_usage_stats(&self) -> Result<u64>;

    async fn system_stats(&self) -> Result<SystemStats>;

    /// 等待后台写入完成
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.flush().await
    }
}
