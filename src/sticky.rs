//! # 粘性会话
//!
//! 同一会话指纹在映射有效期内固定路由到同一个上游账号。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::StickyConfig;
use crate::error::Result;
use crate::store::SharedStore;
use crate::types::{AccountType, StickySessionMapping, timezone::expires_after};
use crate::{
    ldebug,
    logging::{LogComponent, LogStage},
};

/// 映射有效期上限，更长的 TTL 按此截断
pub const MAX_STICKY_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// 查询到的账号绑定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickyAssignment {
    pub account_id: String,
    pub account_type: AccountType,
    pub expires_at: DateTime<Utc>,
}

impl From<StickySessionMapping> for StickyAssignment {
    fn from(mapping: StickySessionMapping) -> Self {
        Self {
            account_id: mapping.account_id,
            account_type: mapping.account_type,
            expires_at: mapping.expires_at,
        }
    }
}

/// 由会话内容计算指纹（SHA-256 十六进制）
#[must_use]
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[derive(Clone)]
pub struct StickySessionRouter {
    store: SharedStore,
    default_ttl: Duration,
}

impl std::fmt::Debug for StickySessionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickySessionRouter")
            .field("store", &self.store.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl StickySessionRouter {
    #[must_use]
    pub fn new(store: SharedStore, config: &StickyConfig) -> Self {
        Self {
            store,
            default_ttl: Duration::from_secs(config.ttl_secs.max(1)),
        }
    }

    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 绑定指纹与账号，`ttl` 为空时使用默认值
    pub async fn assign(
        &self,
        fingerprint: &str,
        account_id: &str,
        account_type: AccountType,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = ttl
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_ttl)
            .min(MAX_STICKY_TTL);
        let ttl_secs = ttl.as_secs().max(1);
        let mapping = StickySessionMapping {
            fingerprint: fingerprint.to_string(),
            account_id: account_id.to_string(),
            account_type,
            ttl_secs,
            expires_at: expires_after(Utc::now(), ttl_secs),
        };
        self.store.set_sticky(&mapping).await?;
        ldebug!(
            "system",
            LogStage::Internal,
            LogComponent::Sticky,
            "assign",
            "粘性会话已绑定",
            fingerprint = fingerprint,
            account_id = account_id,
            ttl_secs = ttl_secs
        );
        Ok(())
    }

    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<StickyAssignment>> {
        Ok(self
            .store
            .get_sticky(fingerprint)
            .await?
            .map(StickyAssignment::from))
    }

    /// 按映射自身的 TTL 续期；映射不存在返回 `false`
    pub async fn extend(&self, fingerprint: &str) -> Result<bool> {
        self.store.touch_sticky(fingerprint).await
    }

    /// 账号不可用时解除绑定
    pub async fn invalidate(&self, fingerprint: &str) -> Result<bool> {
        let removed = self.store.delete_sticky(fingerprint).await?;
        if removed {
            ldebug!(
                "system",
                LogStage::Internal,
                LogComponent::Sticky,
                "invalidate",
                "粘性会话已解除",
                fingerprint = fingerprint
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::helpers::memory_store;

    fn router() -> StickySessionRouter {
        StickySessionRouter::new(Arc::new(memory_store()), &StickyConfig::default())
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let fp = fingerprint("You are a helpful assistant.");
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint("You are a helpful assistant."));
        assert_ne!(fp, fingerprint("You are a helpful assistant"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assignment_expires_after_ttl() {
        let router = router();
        router
            .assign("fp", "acc-1", AccountType::Shared, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let found = router.lookup("fp").await.unwrap().unwrap();
        assert_eq!(found.account_id, "acc-1");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(router.lookup("fp").await.unwrap().is_none());
        assert!(!router.extend("fp").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let router = router();
        router
            .assign("fp", "acc-1", AccountType::Dedicated, None)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(router.extend("fp").await.unwrap());
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(
            router.lookup("fp").await.unwrap().unwrap().account_type,
            AccountType::Dedicated
        );
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_clamped() {
        let router = router();
        router
            .assign(
                "fp",
                "acc-1",
                AccountType::Shared,
                Some(Duration::from_secs(10_000_000_000_000_000)),
            )
            .await
            .unwrap();

        let found = router.lookup("fp").await.unwrap().unwrap();
        let limit = Utc::now() + chrono::Duration::seconds(365 * 24 * 3600 + 5);
        assert!(found.expires_at <= limit);
        assert!(router.extend("fp").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let router = router();
        router
            .assign("fp", "acc-1", AccountType::Group, None)
            .await
            .unwrap();
        assert!(router.invalidate("fp").await.unwrap());
        assert!(!router.invalidate("fp").await.unwrap());
        assert!(router.lookup("fp").await.unwrap().is_none());
    }
}
