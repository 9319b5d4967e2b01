//! # 存储层
//!
//! 三种存储模式在启动时选定一次，之后调用方只面对 `Arc<dyn StoreAdapter>`。

mod codec;
pub mod durable;
pub mod ephemeral;
pub mod hybrid;
mod mirror;
pub mod traits;

use std::sync::Arc;

pub use durable::DurableStore;
pub use ephemeral::{EphemeralStore, KvBackend};
pub use hybrid::HybridStore;
pub use mirror::MirrorQueue;
pub use traits::{
    AccountRepo, ApiKeyRepo, CostRepo, LeaseRepo, SessionRepo, StickyRepo, StoreAdapter,
    UsageRecordRepo, UsageRepo,
};

use crate::config::{AppConfig, SecretCipher, StorageMode};
use crate::database::{init_database, run_migrations};
use crate::error::Result;
use crate::{
    linfo,
    logging::{LogComponent, LogStage},
};

/// 共享的存储句柄
pub type SharedStore = Arc<dyn StoreAdapter>;

/// 按配置的存储模式建立连接
///
/// 持久存储在连接后自动执行迁移。
pub async fn connect_store(config: &AppConfig) -> Result<SharedStore> {
    let cipher = SecretCipher::from_config_key(&config.security.encryption_key)?;
    let mode = config.storage.mode;

    let store: SharedStore = match mode {
        StorageMode::Ephemeral => {
            let kv = KvBackend::connect(&config.redis).await?;
            Arc::new(EphemeralStore::new(kv, cipher, &config.storage))
        }
        StorageMode::Durable => {
            let db = init_database(&config.database).await?;
            run_migrations(&db).await?;
            Arc::new(DurableStore::new(db, cipher, &config.storage))
        }
        StorageMode::Hybrid => {
            let db = init_database(&config.database).await?;
            run_migrations(&db).await?;
            let kv = KvBackend::connect(&config.redis).await?;
            let durable = DurableStore::new(db, cipher.clone(), &config.storage);
            let ephemeral = EphemeralStore::new(kv, cipher, &config.storage);
            Arc::new(HybridStore::new(durable, ephemeral, &config.storage))
        }
    };

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "store_ready",
        "存储层初始化完成",
        mode = %mode,
        adapter = store.name()
    );
    Ok(store)
}
