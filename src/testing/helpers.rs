//! # 测试辅助函数
//!
//! 内存 SQLite、内存键值后端和常用样例记录

use std::collections::BTreeMap;
use std::sync::Once;

use chrono::{TimeZone, Utc};
use sea_orm::DatabaseConnection;
use tracing::Level;

use crate::config::{DatabaseConfig, SecretCipher, StorageConfig};
use crate::database::{init_database, run_migrations};
use crate::store::{DurableStore, EphemeralStore, HybridStore, KvBackend};
use crate::types::{
    AccountStatus, AccountType, ApiKeyCredential, ApiKeyLimits, ApiKeyRecord, ApiKeyRestrictions,
    ApiKeyStatus, ActivationWindow, ProviderAccountRecord, ProviderCredentials, ProviderKind,
};

static INIT: Once = Once::new();

/// 固定测试密钥，保证多次构造的加密器可以互相解密
pub const TEST_ENCRYPTION_KEY: &str =
    "0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

/// 初始化测试日志
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[must_use]
pub fn test_cipher() -> SecretCipher {
    SecretCipher::from_config_key(TEST_ENCRYPTION_KEY).expect("测试密钥有效")
}

/// 已执行迁移的内存数据库
pub async fn create_test_db() -> DatabaseConnection {
    let db = init_database(&DatabaseConfig::in_memory())
        .await
        .expect("内存数据库连接失败");
    run_migrations(&db).await.expect("迁移失败");
    db
}

/// 临时目录下的文件 SQLite，目录随 `TempDir` 一起删除
#[must_use]
pub fn temp_sqlite_config() -> (tempfile::TempDir, DatabaseConfig) {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let path = dir.path().join("relay.db");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        max_connections: 2,
        ..DatabaseConfig::default()
    };
    (dir, config)
}

#[must_use]
pub fn memory_store() -> EphemeralStore {
    init_test_env();
    EphemeralStore::new(KvBackend::memory(), test_cipher(), &StorageConfig::default())
}

pub async fn durable_store() -> DurableStore {
    init_test_env();
    DurableStore::new(create_test_db().await, test_cipher(), &StorageConfig::default())
}

pub async fn hybrid_store() -> HybridStore {
    let storage = StorageConfig::default();
    let durable = DurableStore::new(create_test_db().await, test_cipher(), &storage);
    HybridStore::new(durable, memory_store(), &storage)
}

/// 可用状态的密钥
#[must_use]
pub fn sample_api_key(id: &str, secret_hash: &str) -> ApiKeyRecord {
    let created = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
    ApiKeyRecord {
        id: id.to_string(),
        name: format!("key {id}"),
        description: None,
        secret_hash: secret_hash.to_string(),
        preview: "cr_abc...wxyz".to_string(),
        owner_id: Some("user-1".to_string()),
        limits: ApiKeyLimits::default(),
        restrictions: ApiKeyRestrictions::default(),
        activation: ActivationWindow::default(),
        status: ApiKeyStatus::Active,
        deleted: None,
        last_used_at: None,
        created_at: created,
        updated_at: created,
    }
}

/// 带凭据的 Claude Console 账号
#[must_use]
pub fn sample_account(id: &str) -> ProviderAccountRecord {
    let created = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
    ProviderAccountRecord {
        id: id.to_string(),
        name: format!("account {id}"),
        provider: ProviderKind::ClaudeConsole,
        credentials: Some(ProviderCredentials::ClaudeConsole(ApiKeyCredential {
            api_key: "sk-test-secret".to_string(),
            base_url: Some("https://console.example.com".to_string()),
            extra: BTreeMap::new(),
        })),
        sealed_credentials: None,
        status: AccountStatus::Active,
        priority: 50,
        schedulable: true,
        account_type: AccountType::Shared,
        proxy: None,
        extra: BTreeMap::new(),
        expires_at: None,
        last_refreshed_at: None,
        created_at: created,
        updated_at: created,
    }
}
