//! 限流器注册表
//!
//! 固定档位（全局、登录、注册）在构造时创建；API 密钥档位按密钥懒创建，
//! 闲置超过阈值后由后台任务回收。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::limiter::{FixedWindowLimiter, RateLimitDecision};
use crate::config::{ApiKeyRateLimitConfig, RateLimitConfig, RateLimitTier};
use crate::error::Result;
use crate::store::KvBackend;
use crate::types::ApiKeyRecord;
use crate::{
    ldebug, linfo,
    logging::{LogComponent, LogStage},
};

/// API 密钥限流的作用域
pub const API_KEY_SCOPE: &str = "client_api_rate";

struct KeyLimiter {
    limiter: FixedWindowLimiter,
    last_used: Instant,
}

/// 限流器注册表
pub struct RateLimiterRegistry {
    kv: KvBackend,
    global: FixedWindowLimiter,
    login: FixedWindowLimiter,
    register: FixedWindowLimiter,
    api_key: ApiKeyRateLimitConfig,
    per_key: DashMap<String, KeyLimiter>,
}

impl std::fmt::Debug for RateLimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterRegistry")
            .field("global", &self.global.points())
            .field("login", &self.login.points())
            .field("register", &self.register.points())
            .field("api_key_limiters", &self.per_key.len())
            .finish()
    }
}

fn tier_limiter(kv: &KvBackend, scope: &str, tier: RateLimitTier) -> FixedWindowLimiter {
    FixedWindowLimiter::new(
        kv.clone(),
        scope,
        tier.points,
        Duration::from_secs(tier.duration_secs),
        Duration::from_secs(tier.block_secs),
    )
}

impl RateLimiterRegistry {
    #[must_use]
    pub fn new(kv: KvBackend, config: &RateLimitConfig) -> Self {
        Self {
            global: tier_limiter(&kv, "global_rate", config.global),
            login: tier_limiter(&kv, "login_rate", config.login),
            register: tier_limiter(&kv, "register_rate", config.register),
            api_key: config.api_key.clone(),
            per_key: DashMap::new(),
            kv,
        }
    }

    #[must_use]
    pub const fn global(&self) -> &FixedWindowLimiter {
        &self.global
    }

    #[must_use]
    pub const fn login(&self) -> &FixedWindowLimiter {
        &self.login
    }

    #[must_use]
    pub const fn register(&self) -> &FixedWindowLimiter {
        &self.register
    }

    /// 当前缓存的密钥限流器数量
    #[must_use]
    pub fn api_key_limiter_count(&self) -> usize {
        self.per_key.len()
    }

    /// 按密钥的 RPM 限流；RPM 为 0 表示不限
    pub async fn check_rate_limit(&self, key: &ApiKeyRecord) -> Result<RateLimitDecision> {
        self.check_key(&key.id, key.limits.requests_per_minute).await
    }

    pub async fn check_key(&self, key_id: &str, requests_per_minute: u64) -> Result<RateLimitDecision> {
        if requests_per_minute == 0 {
            return Ok(RateLimitDecision::unlimited());
        }
        let limiter = self.key_limiter(key_id, requests_per_minute);
        limiter.consume(key_id).await
    }

    // 不能持有 DashMap 引用跨 await，这里取出克隆
    fn key_limiter(&self, key_id: &str, points: u64) -> FixedWindowLimiter {
        let now = Instant::now();
        let mut entry = self
            .per_key
            .entry(key_id.to_string())
            .or_insert_with(|| KeyLimiter {
                limiter: self.new_key_limiter(points),
                last_used: now,
            });
        // 密钥 RPM 被修改后重建
        if entry.limiter.points() != points {
            entry.limiter = self.new_key_limiter(points);
        }
        entry.last_used = now;
        entry.limiter.clone()
    }

    fn new_key_limiter(&self, points: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            self.kv.clone(),
            API_KEY_SCOPE,
            points,
            Duration::from_secs(self.api_key.duration_secs),
            Duration::from_secs(self.api_key.block_secs),
        )
    }

    /// 清除某个密钥的计数与封禁
    pub async fn reset_key(&self, key_id: &str) -> Result<()> {
        let limiter = self.per_key.remove(key_id).map(|(_, e)| e.limiter);
        match limiter {
            Some(limiter) => limiter.reset(key_id).await,
            None => self.new_key_limiter(1).reset(key_id).await,
        }
    }

    /// 回收闲置的密钥限流器，返回回收数量
    pub fn cleanup_idle(&self) -> usize {
        let idle = Duration::from_secs(self.api_key.idle_evict_secs);
        let before = self.per_key.len();
        self.per_key
            .retain(|_, entry| entry.last_used.elapsed() < idle);
        let evicted = before.saturating_sub(self.per_key.len());
        if evicted > 0 {
            ldebug!(
                "system",
                LogStage::Cleanup,
                LogComponent::RateLimiter,
                "cleanup_idle",
                "回收闲置的密钥限流器",
                evicted = evicted,
                remaining = self.per_key.len()
            );
        }
        evicted
    }

    /// 周期性回收，直到取消
    pub fn spawn_cleanup_task(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.api_key.cleanup_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.cleanup_idle();
                    }
                }
            }
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::RateLimiter,
                "cleanup_task_stopped",
                "限流器回收任务已停止"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::sample_api_key;
    use pretty_assertions::assert_eq;

    fn registry() -> RateLimiterRegistry {
        RateLimiterRegistry::new(KvBackend::memory(), &RateLimitConfig::default())
    }

    fn key_with_rpm(id: &str, rpm: u64) -> ApiKeyRecord {
        let mut key = sample_api_key(id, &format!("hash-{id}"));
        key.limits.requests_per_minute = rpm;
        key
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_key_rpm_enforced() {
        let registry = registry();
        let key = key_with_rpm("k1", 3);
        for _ in 0..3 {
            assert!(registry.check_rate_limit(&key).await.unwrap().allowed);
        }
        let decision = registry.check_rate_limit(&key).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);

        // 窗口与封禁均为 60 秒
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(registry.check_rate_limit(&key).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_zero_rpm_is_unlimited() {
        let registry = registry();
        let key = key_with_rpm("k1", 0);
        for _ in 0..50 {
            assert!(registry.check_rate_limit(&key).await.unwrap().allowed);
        }
        assert_eq!(registry.api_key_limiter_count(), 0);
    }

    #[tokio::test]
    async fn test_rpm_change_rebuilds_limiter() {
        let registry = registry();
        assert!(registry.check_rate_limit(&key_with_rpm("k1", 1)).await.unwrap().allowed);

        let raised = registry.check_rate_limit(&key_with_rpm("k1", 10)).await.unwrap();
        assert!(raised.allowed);
        assert_eq!(raised.remaining, 8);
    }

    #[tokio::test]
    async fn test_fixed_tiers_use_defaults() {
        let registry = registry();
        for _ in 0..5 {
            assert!(registry.login().consume("1.2.3.4").await.unwrap().allowed);
        }
        assert!(!registry.login().consume("1.2.3.4").await.unwrap().allowed);
        assert!(registry.register().consume("1.2.3.4").await.unwrap().allowed);
        assert_eq!(registry.global().points(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiters_evicted() {
        let registry = registry();
        registry.check_rate_limit(&key_with_rpm("old", 10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3000)).await;
        registry.check_rate_limit(&key_with_rpm("fresh", 10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(700)).await;

        assert_eq!(registry.cleanup_idle(), 1);
        assert_eq!(registry.api_key_limiter_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_cancel() {
        let registry = Arc::new(registry());
        registry.check_rate_limit(&key_with_rpm("k1", 10)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&registry).spawn_cleanup_task(cancel.clone());

        // 3600 秒闲置后，下一次 600 秒周期的回收会清理掉它
        tokio::time::sleep(Duration::from_secs(4200) + Duration::from_millis(1)).await;
        assert_eq!(registry.api_key_limiter_count(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_key_clears_block() {
        let registry = registry();
        let key = key_with_rpm("k1", 1);
        registry.check_rate_limit(&key).await.unwrap();
        assert!(!registry.check_rate_limit(&key).await.unwrap().allowed);

        registry.reset_key("k1").await.unwrap();
        assert!(registry.check_rate_limit(&key).await.unwrap().allowed);
    }
}
