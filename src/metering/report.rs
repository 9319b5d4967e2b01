//! 上报结构与平均值计算

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{UsageAverages, UsageCounters, normalize_model_name};

/// 一次请求的使用量上报
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageReport {
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub ephemeral_5m_tokens: i64,
    pub ephemeral_1h_tokens: i64,
    /// 超过 200K 上下文的请求单独计数
    pub is_long_context: bool,
}

impl UsageReport {
    #[must_use]
    pub fn new(model: impl Into<String>, input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// 归一化后的模型名
    #[must_use]
    pub fn normalized_model(&self) -> String {
        normalize_model_name(&self.model)
    }

    #[must_use]
    pub const fn total_tokens(&self) -> i64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_create_tokens)
            .saturating_add(self.cache_read_tokens)
    }

    /// 桶只增不减，任何令牌数为负都拒绝
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("input_tokens", self.input_tokens),
            ("output_tokens", self.output_tokens),
            ("cache_create_tokens", self.cache_create_tokens),
            ("cache_read_tokens", self.cache_read_tokens),
            ("ephemeral_5m_tokens", self.ephemeral_5m_tokens),
            ("ephemeral_1h_tokens", self.ephemeral_1h_tokens),
        ];
        for (field, value) in fields {
            crate::ensure_valid!(value >= 0, "{} 不能为负数: {}", field, value);
        }
        Ok(())
    }

    /// 转成对每个桶累加的增量
    #[must_use]
    pub fn to_delta(&self) -> UsageCounters {
        let mut delta = UsageCounters {
            requests: 1,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_create_tokens: self.cache_create_tokens,
            cache_read_tokens: self.cache_read_tokens,
            ephemeral_5m_tokens: self.ephemeral_5m_tokens,
            ephemeral_1h_tokens: self.ephemeral_1h_tokens,
            all_tokens: self.total_tokens(),
            long_context_input_tokens: 0,
            long_context_output_tokens: 0,
            long_context_requests: 0,
        };
        if self.is_long_context {
            delta.long_context_input_tokens = self.input_tokens;
            delta.long_context_output_tokens = self.output_tokens;
            delta.long_context_requests = 1;
        }
        delta
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// 按创建以来的天数计算平均值，不足一天按一天算
#[must_use]
pub fn compute_averages(
    total: &UsageCounters,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> UsageAverages {
    let elapsed_secs = (now - created_at).num_seconds().max(0);
    let days = ((elapsed_secs + 86_399) / 86_400).max(1);
    let minutes = days * 1440;

    #[allow(clippy::cast_precision_loss)]
    let (days, minutes) = (days as f64, minutes as f64);
    #[allow(clippy::cast_precision_loss)]
    let (requests, tokens) = (total.requests as f64, total.all_tokens as f64);

    UsageAverages {
        rpm: round2(requests / minutes),
        tpm: round2(tokens / minutes),
        daily_requests: round2(requests / days),
        daily_tokens: round2(tokens / days),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_delta_includes_cache_tokens_in_total() {
        let report = UsageReport {
            model: "claude-sonnet-4".to_string(),
            input_tokens: 100,
            output_tokens: 50,
            cache_create_tokens: 20,
            cache_read_tokens: 30,
            ephemeral_5m_tokens: 20,
            ..UsageReport::default()
        };
        let delta = report.to_delta();
        assert_eq!(delta.requests, 1);
        assert_eq!(delta.all_tokens, 200);
        assert_eq!(delta.ephemeral_5m_tokens, 20);
        assert_eq!(delta.long_context_requests, 0);
    }

    #[test]
    fn test_long_context_counters() {
        let report = UsageReport {
            is_long_context: true,
            ..UsageReport::new("claude-sonnet-4", 250_000, 1_000)
        };
        let delta = report.to_delta();
        assert_eq!(delta.long_context_input_tokens, 250_000);
        assert_eq!(delta.long_context_output_tokens, 1_000);
        assert_eq!(delta.long_context_requests, 1);
    }

    #[rstest]
    #[case(UsageReport::new("m", -100, 50))]
    #[case(UsageReport::new("m", 100, -1))]
    #[case(UsageReport { cache_read_tokens: -5, ..UsageReport::new("m", 1, 1) })]
    #[case(UsageReport { ephemeral_1h_tokens: -1, ..UsageReport::default() })]
    fn test_negative_tokens_rejected(#[case] report: UsageReport) {
        assert!(report.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_total_tokens_saturates() {
        let report = UsageReport::new("m", i64::MAX, 10);
        assert!(report.validate().is_ok());
        assert_eq!(report.total_tokens(), i64::MAX);
    }

    #[rstest]
    // 不足一天按一天
    #[case(Duration::hours(3), 1.0)]
    #[case(Duration::days(2), 2.0)]
    // 向上取整
    #[case(Duration::days(2) + Duration::seconds(1), 3.0)]
    // 创建时间晚于当前时间
    #[case(Duration::seconds(-30), 1.0)]
    fn test_average_day_count(#[case] elapsed: Duration, #[case] days: f64) {
        let created = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let total = UsageCounters {
            requests: 1440,
            all_tokens: 14_400,
            ..UsageCounters::default()
        };
        let averages = compute_averages(&total, created, created + elapsed);
        assert_eq!(averages.daily_requests, round2(1440.0 / days));
        assert_eq!(averages.rpm, round2(1.0 / days));
        assert_eq!(averages.tpm, round2(10.0 / days));
    }

    #[test]
    fn test_averages_rounded_to_two_places() {
        let created = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let total = UsageCounters {
            requests: 10,
            all_tokens: 1000,
            ..UsageCounters::default()
        };
        let averages = compute_averages(&total, created, created + Duration::days(3));
        assert_eq!(averages.daily_requests, 3.33);
        assert_eq!(averages.daily_tokens, 333.33);
        assert_eq!(averages.rpm, 0.0);
        assert_eq!(averages.tpm, 0.23);
    }
}
