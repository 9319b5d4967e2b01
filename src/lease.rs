//! # 并发租约
//!
//! 每个在途请求在上游账号（或 API 密钥）名下持有一份带过期时间的租约，
//! 租约数即当前并发数。进程崩溃时租约自然过期，不需要显式回收。

use std::time::Duration;

use crate::config::ConcurrencyConfig;
use crate::error::Result;
use crate::store::SharedStore;
use crate::{
    ldebug, lwarn,
    logging::{LogComponent, LogStage},
};

/// 超限时建议的重试间隔
const REJECT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// 租约管理器
#[derive(Clone)]
pub struct ConcurrencyLeaseManager {
    store: SharedStore,
    default_lease: Duration,
}

impl std::fmt::Debug for ConcurrencyLeaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLeaseManager")
            .field("store", &self.store.name())
            .field("default_lease", &self.default_lease)
            .finish()
    }
}

/// 准入结果
#[derive(Debug)]
pub enum LeaseDecision {
    Admitted(LeaseGuard),
    Rejected {
        current: u64,
        limit: u64,
        retry_after: Duration,
    },
}

impl LeaseDecision {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }
}

impl ConcurrencyLeaseManager {
    #[must_use]
    pub fn new(store: SharedStore, config: &ConcurrencyConfig) -> Self {
        Self {
            store,
            default_lease: Duration::from_secs(config.default_lease_secs.max(1)),
        }
    }

    #[must_use]
    pub const fn default_lease(&self) -> Duration {
        self.default_lease
    }

    fn lease_for(&self, lease_secs: Option<u64>) -> Duration {
        lease_secs
            .filter(|s| *s > 0)
            .map_or(self.default_lease, Duration::from_secs)
    }

    /// 获取租约，返回获取后的并发数。本身不设上限
    pub async fn acquire(
        &self,
        owner: &str,
        request_id: &str,
        lease_secs: Option<u64>,
    ) -> Result<u64> {
        let count = self
            .store
            .acquire_lease(owner, request_id, self.lease_for(lease_secs))
            .await?;
        ldebug!(
            request_id,
            LogStage::Lease,
            LogComponent::Lease,
            "acquire",
            "租约已获取",
            owner = owner,
            concurrency = count
        );
        Ok(count)
    }

    /// 长请求续期；租约已过期或已释放时不会重新创建
    pub async fn renew(
        &self,
        owner: &str,
        request_id: &str,
        lease_secs: Option<u64>,
    ) -> Result<u64> {
        self.store
            .renew_lease(owner, request_id, self.lease_for(lease_secs))
            .await
    }

    pub async fn release(&self, owner: &str, request_id: &str) -> Result<u64> {
        let count = self.store.release_lease(owner, request_id).await?;
        ldebug!(
            request_id,
            LogStage::Lease,
            LogComponent::Lease,
            "release",
            "租约已释放",
            owner = owner,
            concurrency = count
        );
        Ok(count)
    }

    pub async fn current_count(&self, owner: &str) -> Result<u64> {
        self.store.lease_count(owner).await
    }

    /// 获取租约并检查上限，超限时立即释放。`limit` 为 0 表示不限
    pub async fn admit(&self, owner: &str, request_id: &str, limit: u64) -> Result<LeaseDecision> {
        let current = self.acquire(owner, request_id, None).await?;
        if limit > 0 && current > limit {
            self.release(owner, request_id).await?;
            lwarn!(
                request_id,
                LogStage::Lease,
                LogComponent::Lease,
                "admit_rejected",
                "并发数超过上限",
                owner = owner,
                current = current,
                limit = limit
            );
            return Ok(LeaseDecision::Rejected {
                current,
                limit,
                retry_after: REJECT_RETRY_AFTER,
            });
        }

        Ok(LeaseDecision::Admitted(LeaseGuard {
            manager: self.clone(),
            owner: owner.to_string(),
            request_id: request_id.to_string(),
            released: false,
        }))
    }
}

/// 已获取的租约
///
/// 应显式 `release().await`；未释放就被丢弃时尝试在后台释放，
/// 失败也无妨，租约会按时过期。
#[derive(Debug)]
pub struct LeaseGuard {
    manager: ConcurrencyLeaseManager,
    owner: String,
    request_id: String,
    released: bool,
}

impl LeaseGuard {
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn renew(&self) -> Result<u64> {
        self.manager.renew(&self.owner, &self.request_id, None).await
    }

    pub async fn release(mut self) -> Result<u64> {
        self.released = true;
        self.manager.release(&self.owner, &self.request_id).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = self.manager.clone();
        let owner = std::mem::take(&mut self.owner);
        let request_id = std::mem::take(&mut self.request_id);
        handle.spawn(async move {
            if let Err(e) = manager.release(&owner, &request_id).await {
                lwarn!(
                    request_id.as_str(),
                    LogStage::Lease,
                    LogComponent::Lease,
                    "release_on_drop_failed",
                    &format!("租约后台释放失败，等待过期: {e}"),
                    owner = owner.as_str()
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::join_all;

    use super::*;
    use crate::testing::helpers::memory_store;

    fn manager() -> ConcurrencyLeaseManager {
        ConcurrencyLeaseManager::new(Arc::new(memory_store()), &ConcurrencyConfig::default())
    }

    #[tokio::test]
    async fn test_concurrent_acquire_counts_each_request() {
        let leases = manager();
        let results = join_all((0..20).map(|i| {
            let leases = leases.clone();
            async move { leases.acquire("acc-1", &format!("req-{i}"), None).await }
        }))
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(leases.current_count("acc-1").await.unwrap(), 20);

        for i in 0..20 {
            leases.release("acc-1", &format!("req-{i}")).await.unwrap();
        }
        assert_eq!(leases.current_count("acc-1").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_drops_out() {
        let leases = manager();
        leases.acquire("acc-1", "short", Some(5)).await.unwrap();
        leases.acquire("acc-1", "long", Some(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(leases.current_count("acc-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admit_rejects_over_limit() {
        let leases = manager();
        let first = leases.admit("key-1", "r1", 2).await.unwrap();
        let second = leases.admit("key-1", "r2", 2).await.unwrap();
        assert!(first.is_admitted() && second.is_admitted());

        match leases.admit("key-1", "r3", 2).await.unwrap() {
            LeaseDecision::Rejected { current, limit, .. } => {
                assert_eq!((current, limit), (3, 2));
            }
            LeaseDecision::Admitted(_) => panic!("第三个请求应被拒绝"),
        }
        // 被拒绝的请求不占用名额
        assert_eq!(leases.current_count("key-1").await.unwrap(), 2);

        if let LeaseDecision::Admitted(guard) = first {
            assert_eq!(guard.release().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_zero_limit_is_unlimited() {
        let leases = manager();
        let mut held = Vec::new();
        for i in 0..5 {
            let decision = leases.admit("key-1", &format!("r{i}"), 0).await.unwrap();
            assert!(decision.is_admitted());
            held.push(decision);
        }
        assert_eq!(leases.current_count("key-1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let leases = manager();
        let decision = leases.admit("acc-1", "r1", 0).await.unwrap();
        drop(decision);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(leases.current_count("acc-1").await.unwrap(), 0);
    }
}
