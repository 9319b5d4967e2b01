//! # 使用量与费用计量
//!
//! 每次请求把增量原子地累加到该主体的全部时间桶上；
//! 桶按配置的固定时区切分。

mod report;

use chrono::{DateTime, Utc};

pub use report::{UsageReport, compute_averages};

use crate::error::{Result, StoreError};
use crate::store::SharedStore;
use crate::types::{
    ALL_MODELS, AccountUsageSummary, BucketClock, CostBucketKey, CostIncrement, CostPeriod,
    CostStats, Granularity, Principal, PrincipalType, TOTAL_BUCKET, TodayStats, UsageAverages,
    UsageBucketKey, UsageCounters, UsageIncrement, UsageRecord, UsageStats, normalize_model_name,
};
use crate::{
    ldebug,
    logging::{LogComponent, LogStage},
};

/// 使用量计量器
#[derive(Clone)]
pub struct UsageMeter {
    store: SharedStore,
    clock: BucketClock,
}

impl std::fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMeter")
            .field("store", &self.store.name())
            .field("offset", &self.clock.offset())
            .finish()
    }
}

impl UsageMeter {
    #[must_use]
    pub const fn new(store: SharedStore, clock: BucketClock) -> Self {
        Self { store, clock }
    }

    #[must_use]
    pub const fn clock(&self) -> BucketClock {
        self.clock
    }

    pub async fn record_usage(&self, principal: &Principal, report: &UsageReport) -> Result<()> {
        self.record_usage_at(principal, report, Utc::now()).await
    }

    /// 指定时间点记录，桶键由 `now` 决定
    ///
    /// 同一组桶也累加到全系统主体上。
    pub async fn record_usage_at(
        &self,
        principal: &Principal,
        report: &UsageReport,
        now: DateTime<Utc>,
    ) -> Result<()> {
        report.validate()?;
        let model = report.normalized_model();
        let buckets = self.clock.buckets(now);
        let delta = report.to_delta();
        let mut increment = UsageIncrement {
            principal: principal.clone(),
            buckets: UsageBucketKey::for_request(&model, &buckets),
            delta,
        };
        self.store.increment_usage(&increment).await?;
        if principal.kind != PrincipalType::System {
            increment.principal = Principal::system();
            self.store.increment_usage(&increment).await?;
        }

        ldebug!(
            "system",
            LogStage::Metering,
            LogComponent::Usage,
            "record_usage",
            "使用量已记录",
            principal = %principal,
            model = model.as_str(),
            tokens = delta.all_tokens
        );
        Ok(())
    }

    /// 常规费用：时/日/月/总四个桶一次累加
    pub async fn record_cost(&self, principal: &Principal, amount: f64) -> Result<()> {
        self.record_cost_at(principal, amount, Utc::now()).await
    }

    pub async fn record_cost_at(
        &self,
        principal: &Principal,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !Self::check_amount(amount)? {
            return Ok(());
        }
        let buckets = self.clock.buckets(now);
        self.store
            .increment_cost(&CostIncrement {
                principal: principal.clone(),
                buckets: CostBucketKey::for_request(&buckets),
                amount,
            })
            .await?;
        ldebug!(
            "system",
            LogStage::Metering,
            LogComponent::Cost,
            "record_cost",
            "费用已记录",
            principal = %principal,
            amount = amount
        );
        Ok(())
    }

    /// Opus 模型的周费用，按 ISO 周分桶
    pub async fn record_weekly_opus_cost(&self, principal: &Principal, amount: f64) -> Result<()> {
        self.record_weekly_opus_cost_at(principal, amount, Utc::now())
            .await
    }

    pub async fn record_weekly_opus_cost_at(
        &self,
        principal: &Principal,
        amount: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !Self::check_amount(amount)? {
            return Ok(());
        }
        let buckets = self.clock.buckets(now);
        self.store
            .increment_cost(&CostIncrement {
                principal: principal.clone(),
                buckets: vec![CostBucketKey::weekly_opus(&buckets)],
                amount,
            })
            .await
    }

    // 零费用跳过；负数与非有限值拒绝
    fn check_amount(amount: f64) -> Result<bool> {
        crate::ensure_valid!(
            amount.is_finite() && amount >= 0.0,
            "费用必须是非负有限数: {}",
            amount
        );
        Ok(amount > 0.0)
    }

    /// 追加请求明细
    pub async fn record_request(&self, principal: &Principal, record: &UsageRecord) -> Result<()> {
        self.store.append_usage_record(principal, record).await
    }

    pub async fn recent_records(
        &self,
        principal: &Principal,
        limit: usize,
    ) -> Result<Vec<UsageRecord>> {
        self.store.recent_usage_records(principal, limit).await
    }

    pub async fn get_stats(&self, principal: &Principal) -> Result<UsageStats> {
        self.get_stats_at(principal, Utc::now()).await
    }

    /// 总计、当日、当月与平均值
    pub async fn get_stats_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<UsageStats> {
        let created_at = match principal.kind {
            PrincipalType::System => return self.system_usage_at(now).await,
            _ => self.created_at(principal).await?.unwrap_or(now),
        };
        self.stats_since(principal, created_at, now).await
    }

    async fn stats_since(
        &self,
        principal: &Principal,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<UsageStats> {
        let buckets = self.clock.buckets(now);
        let total = self.usage(principal, &UsageBucketKey::total()).await?;
        let daily = self
            .usage(
                principal,
                &UsageBucketKey::new(ALL_MODELS, Granularity::Day, &buckets.day),
            )
            .await?;
        let monthly = self
            .usage(
                principal,
                &UsageBucketKey::new(ALL_MODELS, Granularity::Month, &buckets.month),
            )
            .await?;
        Ok(UsageStats {
            averages: compute_averages(&total, created_at, now),
            total,
            daily,
            monthly,
        })
    }

    pub async fn today_stats(&self) -> Result<TodayStats> {
        self.today_stats_at(Utc::now()).await
    }

    /// 当日全系统使用量与当日新建的 API 密钥数
    pub async fn today_stats_at(&self, now: DateTime<Utc>) -> Result<TodayStats> {
        let today = self.clock.buckets(now).day;
        let usage = self
            .usage(
                &Principal::system(),
                &UsageBucketKey::new(ALL_MODELS, Granularity::Day, &today),
            )
            .await?;
        let api_keys_created = self
            .store
            .list_api_keys()
            .await?
            .iter()
            .filter(|k| !k.is_deleted() && self.clock.buckets(k.created_at).day == today)
            .count() as u64;
        Ok(TodayStats {
            date: today,
            usage,
            api_keys_created,
        })
    }

    pub async fn system_usage(&self) -> Result<UsageStats> {
        self.system_usage_at(Utc::now()).await
    }

    /// 全系统汇总，平均值从最早的 API 密钥创建时间算起
    pub async fn system_usage_at(&self, now: DateTime<Utc>) -> Result<UsageStats> {
        let since = self
            .store
            .list_api_keys()
            .await?
            .iter()
            .map(|k| k.created_at)
            .min()
            .unwrap_or(now);
        self.stats_since(&Principal::system(), since, now).await
    }

    pub async fn system_averages(&self) -> Result<UsageAverages> {
        Ok(self.system_usage().await?.averages)
    }

    pub async fn all_accounts_usage(&self) -> Result<Vec<AccountUsageSummary>> {
        self.all_accounts_usage_at(Utc::now()).await
    }

    /// 每个上游账号的使用量，按账号列表顺序
    pub async fn all_accounts_usage_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AccountUsageSummary>> {
        let accounts = self.store.list_accounts().await?;
        let mut summaries = Vec::with_capacity(accounts.len());
        for account in accounts {
            let principal = Principal::account(&account.id);
            let stats = self.stats_since(&principal, account.created_at, now).await?;
            summaries.push(AccountUsageSummary {
                account_id: account.id,
                name: account.name,
                account_type: account.account_type,
                stats,
            });
        }
        Ok(summaries)
    }

    /// 单个模型在某个时间桶的使用量
    pub async fn get_model_usage(
        &self,
        principal: &Principal,
        model: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Result<UsageCounters> {
        let buckets = self.clock.buckets(now);
        let bucket = match granularity {
            Granularity::Hour => buckets.hour,
            Granularity::Day => buckets.day,
            Granularity::Month => buckets.month,
            Granularity::Total => {
                return Err(StoreError::validation("单模型统计不提供总计桶"));
            }
        };
        let model = normalize_model_name(model);
        self.usage(principal, &UsageBucketKey::new(model, granularity, bucket))
            .await
    }

    pub async fn get_cost_stats(&self, principal: &Principal) -> Result<CostStats> {
        self.get_cost_stats_at(principal, Utc::now()).await
    }

    pub async fn get_cost_stats_at(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<CostStats> {
        let buckets = self.clock.buckets(now);
        Ok(CostStats {
            hourly: self.cost(principal, CostPeriod::Hourly, &buckets.hour).await?,
            daily: self.cost(principal, CostPeriod::Daily, &buckets.day).await?,
            monthly: self.cost(principal, CostPeriod::Monthly, &buckets.month).await?,
            weekly_opus: self
                .cost(principal, CostPeriod::WeeklyOpus, &buckets.iso_week)
                .await?,
            total: self.cost(principal, CostPeriod::Total, TOTAL_BUCKET).await?,
        })
    }

    async fn cost(&self, principal: &Principal, period: CostPeriod, bucket: &str) -> Result<f64> {
        Ok(self
            .store
            .get_cost(principal, &CostBucketKey::new(period, bucket))
            .await?
            .unwrap_or_default())
    }

    async fn usage(&self, principal: &Principal, bucket: &UsageBucketKey) -> Result<UsageCounters> {
        Ok(self
            .store
            .get_usage(principal, bucket)
            .await?
            .unwrap_or_default())
    }

    async fn created_at(&self, principal: &Principal) -> Result<Option<DateTime<Utc>>> {
        Ok(match principal.kind {
            PrincipalType::ApiKey => self
                .store
                .get_api_key(&principal.id)
                .await?
                .map(|k| k.created_at),
            PrincipalType::Account => self
                .store
                .get_account(&principal.id)
                .await?
                .map(|a| a.created_at),
            PrincipalType::System => None,
        })
    }
}
