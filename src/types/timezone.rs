//! # 时间桶计算
//!
//! 统计桶按配置的固定偏移（默认 UTC+8）切分，与进程所在时区无关。
//! 所有函数都显式接收 `now`，便于测试。

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Offset, Utc};

/// 全时段桶的固定键
pub const TOTAL_BUCKET: &str = "all";

/// 一次写入涉及的全部日历桶键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBuckets {
    /// `YYYY-MM-DD:HH`
    pub hour: String,
    /// `YYYY-MM-DD`
    pub day: String,
    /// `YYYY-MM`
    pub month: String,
    /// ISO 周 `YYYY-Www`
    pub iso_week: String,
}

/// 按固定偏移计算桶键
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketClock {
    offset: FixedOffset,
}

impl Default for BucketClock {
    fn default() -> Self {
        Self::utc_plus_8()
    }
}

impl BucketClock {
    #[must_use]
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    #[must_use]
    pub fn utc_plus_8() -> Self {
        Self::new(FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()))
    }

    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// 转为配置时区的本地时间
    #[must_use]
    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    #[must_use]
    pub fn buckets(&self, now: DateTime<Utc>) -> TimeBuckets {
        let local = self.local(now);
        let week = local.iso_week();
        TimeBuckets {
            hour: local.format("%Y-%m-%d:%H").to_string(),
            day: local.format("%Y-%m-%d").to_string(),
            month: local.format("%Y-%m").to_string(),
            iso_week: format!("{}-W{:02}", week.year(), week.week()),
        }
    }
}

/// 数据库中的朴素 UTC 时间
#[must_use]
pub fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

#[must_use]
pub fn from_naive(naive: NaiveDateTime) -> DateTime<Utc> {
    naive.and_utc()
}

/// `now` 之后 `secs` 秒；超出可表示范围时取最大时间
#[must_use]
pub fn expires_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// TTL 表使用的毫秒时间戳
#[must_use]
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}
