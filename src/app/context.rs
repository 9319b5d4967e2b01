//! 存储上下文：持有存储句柄与其上的全部服务

use std::sync::Arc;
use std::time::Duration;

use super::tasks::BackgroundTasks;
use crate::api_keys::ApiKeyService;
use crate::config::AppConfig;
use crate::error::Result;
use crate::lease::ConcurrencyLeaseManager;
use crate::metering::UsageMeter;
use crate::rate_limit::RateLimiterRegistry;
use crate::sticky::StickySessionRouter;
use crate::store::{KvBackend, SharedStore, connect_store};
use crate::types::BucketClock;
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};

pub struct StorageContext {
    config: Arc<AppConfig>,
    store: SharedStore,
    api_keys: ApiKeyService,
    leases: ConcurrencyLeaseManager,
    rate_limits: Arc<RateLimiterRegistry>,
    meter: UsageMeter,
    sticky: StickySessionRouter,
    tasks: BackgroundTasks,
}

impl std::fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContext")
            .field("mode", &self.config.storage.mode)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl StorageContext {
    /// 校验配置、连接存储并构造服务，不启动后台任务
    pub async fn connect(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = connect_store(&config).await?;
        Self::from_store(config, store)
    }

    /// 基于已有存储构造
    pub fn from_store(config: AppConfig, store: SharedStore) -> Result<Self> {
        let clock = BucketClock::new(config.timezone.offset()?);
        // 纯持久模式没有临时存储，限流计数放在进程内存
        let limiter_kv = store.kv_backend().unwrap_or_else(KvBackend::memory);

        let context = Self {
            api_keys: ApiKeyService::new(Arc::clone(&store), &config.security),
            leases: ConcurrencyLeaseManager::new(Arc::clone(&store), &config.concurrency),
            rate_limits: Arc::new(RateLimiterRegistry::new(limiter_kv, &config.rate_limit)),
            meter: UsageMeter::new(Arc::clone(&store), clock),
            sticky: StickySessionRouter::new(Arc::clone(&store), &config.sticky),
            tasks: BackgroundTasks::new(),
            config: Arc::new(config),
            store,
        };
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Main,
            "context_ready",
            "存储上下文已就绪",
            mode = %context.config.storage.mode,
            store = context.store.name()
        );
        Ok(context)
    }

    /// 启动限流器回收与定期清理
    pub async fn start_background_tasks(&self) {
        let handle = Arc::clone(&self.rate_limits).spawn_cleanup_task(self.tasks.child_token());
        self.tasks.register(handle).await;

        let interval = self.config.storage.cleanup_interval_secs;
        if interval > 0 {
            self.tasks
                .spawn_store_cleanup(Arc::clone(&self.store), Duration::from_secs(interval))
                .await;
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub const fn api_keys(&self) -> &ApiKeyService {
        &self.api_keys
    }

    #[must_use]
    pub const fn leases(&self) -> &ConcurrencyLeaseManager {
        &self.leases
    }

    #[must_use]
    pub fn rate_limits(&self) -> Arc<RateLimiterRegistry> {
        Arc::clone(&self.rate_limits)
    }

    #[must_use]
    pub const fn meter(&self) -> &UsageMeter {
        &self.meter
    }

    #[must_use]
    pub const fn sticky(&self) -> &StickySessionRouter {
        &self.sticky
    }

    #[must_use]
    pub const fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// 停止后台任务，排空镜像队列
    pub async fn shutdown(&self) -> Result<()> {
        self.tasks.shutdown().await;
        self.store.shutdown().await?;
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "context_shutdown",
            "存储上下文已关闭"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::api_keys::NewApiKey;
    use crate::config::{EphemeralBackend, StorageMode};
    use crate::testing::helpers::{TEST_ENCRYPTION_KEY, durable_store, memory_store};

    fn config(mode: StorageMode) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.mode = mode;
        config.redis.backend = EphemeralBackend::Memory;
        config.database = crate::config::DatabaseConfig::in_memory();
        config.security.encryption_key = TEST_ENCRYPTION_KEY.to_string();
        config
    }

    #[tokio::test]
    async fn test_connect_wires_services() {
        let context = StorageContext::connect(config(StorageMode::Hybrid))
            .await
            .unwrap();
        assert_eq!(context.store().name(), "hybrid");

        let issued = context
            .api_keys()
            .issue(NewApiKey {
                name: "wired".to_string(),
                ..NewApiKey::default()
            })
            .await
            .unwrap();
        let key = context
            .api_keys()
            .verify_api_key(&issued.secret)
            .await
            .unwrap()
            .unwrap();
        assert!(context.rate_limits().check_rate_limit(&key).await.unwrap().allowed);
        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_durable_mode_limits_in_memory() {
        let context =
            StorageContext::from_store(config(StorageMode::Durable), Arc::new(durable_store().await))
                .unwrap();
        for _ in 0..5 {
            assert!(context.rate_limits().login().consume("ip").await.unwrap().allowed);
        }
        assert!(!context.rate_limits().login().consume("ip").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config(StorageMode::Ephemeral);
        bad.security.encryption_key.clear();
        assert!(StorageContext::connect(bad).await.is_err());
    }

    #[tokio::test]
    async fn test_background_tasks_stop_on_shutdown() {
        let context =
            StorageContext::from_store(config(StorageMode::Ephemeral), Arc::new(memory_store()))
                .unwrap();
        context.start_background_tasks().await;
        assert_eq!(context.tasks().task_count().await, 2);

        context.shutdown().await.unwrap();
        assert_eq!(context.tasks().task_count().await, 0);
    }
}
