//! # 临时存储键命名
//!
//! 所有键在这里集中生成，Redis 全局前缀由后端统一追加

use std::fmt;

use crate::types::{CostBucketKey, Principal, SessionKind, UsageBucketKey};

/// 临时存储键
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvKey<'a> {
    /// `apikey:{id}`
    ApiKey(&'a str),
    /// `apikey_hash:{hash}`
    ApiKeyHash(&'a str),
    /// `account:{id}`
    Account(&'a str),
    /// `session:{id}` / `oauth:{id}`
    Session(SessionKind, &'a str),
    /// `sticky:{fingerprint}`
    Sticky(&'a str),
    /// `concurrency:{owner}`
    Concurrency(&'a str),
    /// `usage:{ptype}:{id}:{granularity}:{bucket}:{model}`
    Usage(&'a Principal, &'a UsageBucketKey),
    /// `cost:{ptype}:{id}:{period}:{bucket}`
    Cost(&'a Principal, &'a CostBucketKey),
    /// `usage_records:{ptype}:{id}`
    UsageRecords(&'a Principal),
    /// `cache:{family}:{id}`
    Cache(CacheFamily, &'a str),
}

/// 混合模式下的缓存族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFamily {
    ApiKey,
    ApiKeyHash,
    Account,
}

impl CacheFamily {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::ApiKeyHash => "api_key_hash",
            Self::Account => "account",
        }
    }
}

impl KvKey<'_> {
    /// 列举同族键时使用的前缀
    #[must_use]
    pub const fn family_prefix(&self) -> &'static str {
        match self {
            Self::ApiKey(_) => prefix::API_KEY,
            Self::ApiKeyHash(_) => prefix::API_KEY_HASH,
            Self::Account(_) => prefix::ACCOUNT,
            Self::Session(SessionKind::Login, _) => prefix::SESSION,
            Self::Session(SessionKind::OAuth, _) => prefix::OAUTH,
            Self::Sticky(_) => prefix::STICKY,
            Self::Concurrency(_) => prefix::CONCURRENCY,
            Self::Usage(..) => prefix::USAGE,
            Self::Cost(..) => prefix::COST,
            Self::UsageRecords(_) => prefix::USAGE_RECORDS,
            Self::Cache(..) => prefix::CACHE,
        }
    }
}

impl fmt::Display for KvKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.family_prefix();
        match self {
            Self::ApiKey(id)
            | Self::Account(id)
            | Self::Session(_, id)
            | Self::Concurrency(id) => write!(f, "{p}{id}"),
            Self::ApiKeyHash(hash) => write!(f, "{p}{hash}"),
            Self::Sticky(fp) => write!(f, "{p}{fp}"),
            Self::Usage(principal, key) => write!(
                f,
                "{p}{}:{}:{}:{}:{}",
                principal.kind.as_str(),
                principal.id,
                key.granularity.as_str(),
                key.bucket,
                key.model
            ),
            Self::Cost(principal, key) => write!(
                f,
                "{p}{}:{}:{}:{}",
                principal.kind.as_str(),
                principal.id,
                key.period.as_str(),
                key.bucket
            ),
            Self::UsageRecords(principal) => {
                write!(f, "{p}{}:{}", principal.kind.as_str(), principal.id)
            }
            Self::Cache(family, id) => write!(f, "{p}{}:{id}", family.as_str()),
        }
    }
}

/// 键前缀
pub mod prefix {
    pub const API_KEY: &str = "apikey:";
    pub const API_KEY_HASH: &str = "apikey_hash:";
    pub const ACCOUNT: &str = "account:";
    pub const SESSION: &str = "session:";
    pub const OAUTH: &str = "oauth:";
    pub const STICKY: &str = "sticky:";
    pub const CONCURRENCY: &str = "concurrency:";
    pub const USAGE: &str = "usage:";
    pub const COST: &str = "cost:";
    pub const USAGE_RECORDS: &str = "usage_records:";
    pub const CACHE: &str = "cache:";
}

/// 限流计数键 `{scope}:{principal}`
#[must_use]
pub fn rate_limit_key(scope: &str, principal: &str) -> String {
    format!("{scope}:{principal}")
}

/// 限流封禁键 `{scope}:blocked:{principal}`
#[must_use]
pub fn rate_limit_block_key(scope: &str, principal: &str) -> String {
    format!("{scope}:blocked:{principal}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CostPeriod, Granularity};

    #[test]
    fn test_key_layout() {
        let principal = Principal::api_key("k1");
        let usage = UsageBucketKey::new("*", Granularity::Day, "2025-05-01");
        let cost = CostBucketKey::new(CostPeriod::WeeklyOpus, "2025-W18");

        assert_eq!(KvKey::ApiKey("k1").to_string(), "apikey:k1");
        assert_eq!(KvKey::ApiKeyHash("ab").to_string(), "apikey_hash:ab");
        assert_eq!(KvKey::Session(SessionKind::OAuth, "s").to_string(), "oauth:s");
        assert_eq!(
            KvKey::Usage(&principal, &usage).to_string(),
            "usage:api_key:k1:day:2025-05-01:*"
        );
        assert_eq!(
            KvKey::Cost(&principal, &cost).to_string(),
            "cost:api_key:k1:weekly_opus:2025-W18"
        );
        assert_eq!(
            KvKey::Cache(CacheFamily::ApiKeyHash, "ab").to_string(),
            "cache:api_key_hash:ab"
        );
        assert_eq!(rate_limit_block_key("login", "u"), "login:blocked:u");
    }
}
