//! 固定窗口限流器
//!
//! 窗口内计数超过 `points` 后写入封禁键，封禁期内即使窗口已重置也一律拒绝。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::store::KvBackend;
use crate::store::ephemeral::keys::{rate_limit_block_key, rate_limit_key};
use crate::types::timezone::expires_after;
use crate::{
    ldebug, lwarn,
    logging::{LogComponent, LogStage},
};

/// 单次消费的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// 当前窗口剩余次数
    pub remaining: u64,
    /// 窗口（或封禁）结束时刻
    pub reset_at: DateTime<Utc>,
    /// 被拒绝时建议的等待时间，放行时为零
    pub retry_after: Duration,
}

impl RateLimitDecision {
    /// 不限流时的放行结果
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: u64::MAX,
            reset_at: Utc::now(),
            retry_after: Duration::ZERO,
        }
    }

    fn rejected(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at: after(retry_after),
            retry_after,
        }
    }
}

fn after(d: Duration) -> DateTime<Utc> {
    expires_after(Utc::now(), d.as_secs())
}

/// 固定窗口限流器
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    kv: KvBackend,
    scope: String,
    points: u64,
    duration: Duration,
    block_duration: Duration,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(
        kv: KvBackend,
        scope: impl Into<String>,
        points: u64,
        duration: Duration,
        block_duration: Duration,
    ) -> Self {
        Self {
            kv,
            scope: scope.into(),
            points: points.max(1),
            duration: duration.max(Duration::from_secs(1)),
            block_duration,
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub const fn points(&self) -> u64 {
        self.points
    }

    /// 消费一次
    pub async fn consume(&self, principal: &str) -> Result<RateLimitDecision> {
        let block_key = rate_limit_block_key(&self.scope, principal);
        if self.kv.get(&block_key).await?.is_some() {
            let retry_after = self.kv.ttl(&block_key).await?.unwrap_or(self.block_duration);
            ldebug!(
                "system",
                LogStage::RateLimit,
                LogComponent::RateLimiter,
                "blocked",
                "处于封禁期，请求被拒绝",
                scope = self.scope.as_str(),
                principal = principal
            );
            return Ok(RateLimitDecision::rejected(retry_after));
        }

        let key = rate_limit_key(&self.scope, principal);
        let (count, window_left) = self.kv.incr_window(&key, 1, self.duration).await?;
        let count = u64::try_from(count).unwrap_or(0);

        if count > self.points {
            let retry_after = if self.block_duration.is_zero() {
                window_left
            } else {
                self.kv
                    .set(&block_key, "1", Some(self.block_duration))
                    .await?;
                self.block_duration.max(window_left)
            };
            lwarn!(
                "system",
                LogStage::RateLimit,
                LogComponent::RateLimiter,
                "limit_exceeded",
                "超过限流阈值",
                scope = self.scope.as_str(),
                principal = principal,
                points = self.points,
                retry_after_secs = retry_after.as_secs()
            );
            return Ok(RateLimitDecision::rejected(retry_after));
        }

        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.points - count,
            reset_at: after(window_left),
            retry_after: Duration::ZERO,
        })
    }

    /// 清除计数与封禁
    pub async fn reset(&self, principal: &str) -> Result<()> {
        self.kv
            .delete(&rate_limit_key(&self.scope, principal))
            .await?;
        self.kv
            .delete(&rate_limit_block_key(&self.scope, principal))
            .await?;
        Ok(())
    }
}
