//! # 使用量与费用类型

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conversion::{loose, parse_i64_str};
use super::records::AccountType;
use super::timezone::{TOTAL_BUCKET, TimeBuckets};
use crate::error::{Result, StoreError};

/// 全模型汇总使用的伪模型名
pub const ALL_MODELS: &str = "*";

/// 全系统汇总主体的 id
pub const SYSTEM_PRINCIPAL_ID: &str = "all";

/// 计量主体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    ApiKey,
    Account,
    /// 全系统汇总
    System,
}

impl PrincipalType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Account => "account",
            Self::System => "system",
        }
    }
}

impl FromStr for PrincipalType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "api_key" => Ok(Self::ApiKey),
            "account" => Ok(Self::Account),
            "system" => Ok(Self::System),
            other => Err(StoreError::validation(format!("未知的主体类型: {other}"))),
        }
    }
}

/// 计量主体
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub kind: PrincipalType,
    pub id: String,
}

impl Principal {
    pub fn api_key(id: impl Into<String>) -> Self {
        Self {
            kind: PrincipalType::ApiKey,
            id: id.into(),
        }
    }

    pub fn account(id: impl Into<String>) -> Self {
        Self {
            kind: PrincipalType::Account,
            id: id.into(),
        }
    }

    /// 全系统汇总主体，每次请求都会同步累加
    #[must_use]
    pub fn system() -> Self {
        Self {
            kind: PrincipalType::System,
            id: SYSTEM_PRINCIPAL_ID.to_string(),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// 统计粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
    Total,
}

impl Granularity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Total => "total",
        }
    }
}

/// 使用量桶定位
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageBucketKey {
    pub model: String,
    pub granularity: Granularity,
    pub bucket: String,
}

impl UsageBucketKey {
    pub fn new(model: impl Into<String>, granularity: Granularity, bucket: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            granularity,
            bucket: bucket.into(),
        }
    }

    /// 全模型全时段
    #[must_use]
    pub fn total() -> Self {
        Self::new(ALL_MODELS, Granularity::Total, TOTAL_BUCKET)
    }

    /// 一次请求要累加的全部桶：模型的时/日/月 + 全模型的日/月/总
    #[must_use]
    pub fn for_request(model: &str, buckets: &TimeBuckets) -> Vec<Self> {
        vec![
            Self::new(model, Granularity::Hour, &buckets.hour),
            Self::new(model, Granularity::Day, &buckets.day),
            Self::new(model, Granularity::Month, &buckets.month),
            Self::new(ALL_MODELS, Granularity::Day, &buckets.day),
            Self::new(ALL_MODELS, Granularity::Month, &buckets.month),
            Self::total(),
        ]
    }
}

/// 使用量计数器，既是增量也是累计值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    #[serde(default, deserialize_with = "loose::i64")]
    pub requests: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub input_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub output_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub cache_create_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub cache_read_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub ephemeral_5m_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub ephemeral_1h_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub all_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub long_context_input_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub long_context_output_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub long_context_requests: i64,
}

impl UsageCounters {
    /// 字段名，与数据库列名及 Redis 哈希字段一致
    pub const FIELDS: [&'static str; 11] = [
        "requests",
        "input_tokens",
        "output_tokens",
        "cache_create_tokens",
        "cache_read_tokens",
        "ephemeral_5m_tokens",
        "ephemeral_1h_tokens",
        "all_tokens",
        "long_context_input_tokens",
        "long_context_output_tokens",
        "long_context_requests",
    ];

    #[must_use]
    pub const fn values(&self) -> [i64; 11] {
        [
            self.requests,
            self.input_tokens,
            self.output_tokens,
            self.cache_create_tokens,
            self.cache_read_tokens,
            self.ephemeral_5m_tokens,
            self.ephemeral_1h_tokens,
            self.all_tokens,
            self.long_context_input_tokens,
            self.long_context_output_tokens,
            self.long_context_requests,
        ]
    }

    /// 非零字段，写入时跳过零增量
    pub fn non_zero(&self) -> impl Iterator<Item = (&'static str, i64)> + '_ {
        Self::FIELDS
            .into_iter()
            .zip(self.values())
            .filter(|(_, v)| *v != 0)
    }

    fn slot(&mut self, field: &str) -> Option<&mut i64> {
        Some(match field {
            "requests" => &mut self.requests,
            "input_tokens" => &mut self.input_tokens,
            "output_tokens" => &mut self.output_tokens,
            "cache_create_tokens" => &mut self.cache_create_tokens,
            "cache_read_tokens" => &mut self.cache_read_tokens,
            "ephemeral_5m_tokens" => &mut self.ephemeral_5m_tokens,
            "ephemeral_1h_tokens" => &mut self.ephemeral_1h_tokens,
            "all_tokens" => &mut self.all_tokens,
            "long_context_input_tokens" => &mut self.long_context_input_tokens,
            "long_context_output_tokens" => &mut self.long_context_output_tokens,
            "long_context_requests" => &mut self.long_context_requests,
            _ => return None,
        })
    }

    /// 从哈希字段还原；未知字段忽略，非法数字按 0 处理
    #[must_use]
    pub fn from_hash(hash: &HashMap<String, String>) -> Self {
        let mut counters = Self::default();
        for (field, raw) in hash {
            if let Some(slot) = counters.slot(field) {
                *slot = parse_i64_str(raw).unwrap_or(0);
            }
        }
        counters
    }

    pub fn add(&mut self, other: &Self) {
        for (field, value) in Self::FIELDS.into_iter().zip(other.values()) {
            if let Some(slot) = self.slot(field) {
                *slot += value;
            }
        }
    }

    /// 逐字段取较大值，用于合并同一个桶的两份副本
    pub fn max_with(&mut self, other: &Self) {
        for (field, value) in Self::FIELDS.into_iter().zip(other.values()) {
            if let Some(slot) = self.slot(field) {
                *slot = (*slot).max(value);
            }
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        let values = self.values();
        let mut i = 0;
        while i < values.len() {
            if values[i] != 0 {
                return false;
            }
            i += 1;
        }
        true
    }
}

/// 一次使用量累加请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageIncrement {
    pub principal: Principal,
    pub buckets: Vec<UsageBucketKey>,
    pub delta: UsageCounters,
}

/// 费用周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPeriod {
    Hourly,
    Daily,
    Monthly,
    WeeklyOpus,
    Total,
}

impl CostPeriod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::WeeklyOpus => "weekly_opus",
            Self::Total => "total",
        }
    }
}

/// 费用桶定位
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CostBucketKey {
    pub period: CostPeriod,
    pub bucket: String,
}

impl CostBucketKey {
    pub fn new(period: CostPeriod, bucket: impl Into<String>) -> Self {
        Self {
            period,
            bucket: bucket.into(),
        }
    }

    /// 常规费用：时/日/月/总
    #[must_use]
    pub fn for_request(buckets: &TimeBuckets) -> Vec<Self> {
        vec![
            Self::new(CostPeriod::Daily, &buckets.day),
            Self::new(CostPeriod::Monthly, &buckets.month),
            Self::new(CostPeriod::Hourly, &buckets.hour),
            Self::new(CostPeriod::Total, TOTAL_BUCKET),
        ]
    }

    #[must_use]
    pub fn weekly_opus(buckets: &TimeBuckets) -> Self {
        Self::new(CostPeriod::WeeklyOpus, &buckets.iso_week)
    }
}

/// 一次费用累加请求
#[derive(Debug, Clone, PartialEq)]
pub struct CostIncrement {
    pub principal: Principal,
    pub buckets: Vec<CostBucketKey>,
    pub amount: f64,
}

/// 平均速率
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAverages {
    pub rpm: f64,
    pub tpm: f64,
    pub daily_requests: f64,
    pub daily_tokens: f64,
}

/// 主体的使用量汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total: UsageCounters,
    pub daily: UsageCounters,
    pub monthly: UsageCounters,
    pub averages: UsageAverages,
}

/// 当日全系统概览
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodayStats {
    /// 当日桶，`YYYY-MM-DD`
    pub date: String,
    pub usage: UsageCounters,
    pub api_keys_created: u64,
}

/// 账号维度的使用量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUsageSummary {
    pub account_id: String,
    pub name: String,
    pub account_type: AccountType,
    pub stats: UsageStats,
}

/// 主体的费用汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
    pub weekly_opus: f64,
    pub total: f64,
}

/// 单次请求的使用明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, deserialize_with = "loose::i64")]
    pub input_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub output_tokens: i64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub cache_tokens: i64,
    #[serde(default, deserialize_with = "loose::f64")]
    pub cost: f64,
    #[serde(default, deserialize_with = "loose::i64")]
    pub response_time_ms: i64,
    #[serde(default, deserialize_with = "loose::i32")]
    pub status_code: i32,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// 管理端概览
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub api_keys: u64,
    pub active_api_keys: u64,
    pub accounts: u64,
    pub schedulable_accounts: u64,
}

/// 过期数据清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub sessions: u64,
    pub oauth_sessions: u64,
    pub sticky_sessions: u64,
    pub leases: u64,
    pub usage_records: u64,
}

impl CleanupReport {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.sessions + self.oauth_sessions + self.sticky_sessions + self.leases + self.usage_records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BucketClock;
    use chrono::TimeZone;

    #[test]
    fn test_request_buckets_layout() {
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 2, 0, 0).unwrap();
        let buckets = BucketClock::utc_plus_8().buckets(now);
        let keys = UsageBucketKey::for_request("claude-sonnet-4", &buckets);

        assert_eq!(keys.len(), 6);
        assert_eq!(keys[0].bucket, "2025-05-01:10");
        assert!(keys.contains(&UsageBucketKey::total()));
        assert_eq!(
            keys.iter().filter(|k| k.model == ALL_MODELS).count(),
            3
        );
    }

    #[test]
    fn test_counters_from_hash_and_add() {
        let hash: HashMap<String, String> = [
            ("requests".to_string(), "2".to_string()),
            ("input_tokens".to_string(), "100".to_string()),
            ("bogus".to_string(), "9".to_string()),
            ("output_tokens".to_string(), "".to_string()),
        ]
        .into_iter()
        .collect();

        let mut counters = UsageCounters::from_hash(&hash);
        assert_eq!(counters.requests, 2);
        assert_eq!(counters.input_tokens, 100);
        assert_eq!(counters.output_tokens, 0);

        counters.add(&UsageCounters {
            requests: 1,
            output_tokens: 5,
            ..UsageCounters::default()
        });
        assert_eq!(counters.requests, 3);
        assert_eq!(counters.output_tokens, 5);
        assert_eq!(counters.non_zero().count(), 3);
        assert!(UsageCounters::default().is_empty());
    }

    #[test]
    fn test_max_with_is_per_field() {
        let mut ephemeral = UsageCounters {
            requests: 5,
            all_tokens: 10,
            ..UsageCounters::default()
        };
        ephemeral.max_with(&UsageCounters {
            requests: 2,
            all_tokens: 160,
            ..UsageCounters::default()
        });
        assert_eq!((ephemeral.requests, ephemeral.all_tokens), (5, 160));
    }

    #[test]
    fn test_system_principal_round_trips_kind() {
        let system = Principal::system();
        assert_eq!(system.to_string(), "system:all");
        assert_eq!("system".parse::<PrincipalType>().unwrap(), PrincipalType::System);
    }
}
