use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::store::traits::{
    AccountRepo, ApiKeyRepo, CostRepo, LeaseRepo, SessionRepo, StickyRepo, UsageRecordRepo,
    UsageRepo,
};
use crate::testing::helpers::{create_test_db, durable_store, sample_account, sample_api_key};
use crate::types::{
    AccountType, CostBucketKey, CostIncrement, CostPeriod, Granularity, Principal, SessionKind,
    SessionRecord, SoftDelete, StickySessionMapping, UsageBucketKey, UsageCounters,
    UsageIncrement, UsageRecord,
};

#[tokio::test]
async fn test_api_key_upsert_is_idempotent() {
    let store = durable_store().await;
    let mut key = sample_api_key("k1", "hash-1");
    store.upsert_api_key(&key).await.unwrap();

    key.name = "renamed".to_string();
    key.updated_at = Utc::now();
    store.upsert_api_key(&key).await.unwrap();

    let keys = store.list_api_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, "renamed");
    assert_eq!(keys[0].created_at, sample_api_key("k1", "hash-1").created_at);
}

#[tokio::test]
async fn test_duplicate_hash_is_conflict() {
    let store = durable_store().await;
    store
        .upsert_api_key(&sample_api_key("k1", "hash-1"))
        .await
        .unwrap();

    let err = store
        .upsert_api_key(&sample_api_key("k2", "hash-1"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_find_by_hash_excludes_soft_deleted() {
    let store = durable_store().await;
    let mut key = sample_api_key("k1", "hash-1");
    store.upsert_api_key(&key).await.unwrap();
    assert!(store.find_api_key_by_hash("hash-1").await.unwrap().is_some());

    key.deleted = Some(SoftDelete {
        deleted_by: "admin".to_string(),
        deleted_at: Utc::now(),
    });
    store.upsert_api_key(&key).await.unwrap();
    assert!(store.find_api_key_by_hash("hash-1").await.unwrap().is_none());
    assert!(store.get_api_key("k1").await.unwrap().unwrap().is_deleted());
}

#[tokio::test]
async fn test_account_credentials_survive_round_trip() {
    let store = durable_store().await;
    let account = sample_account("acc-1");
    store.upsert_account(&account).await.unwrap();

    assert_eq!(store.get_account("acc-1").await.unwrap().unwrap(), account);
    assert!(store.delete_account("acc-1").await.unwrap());
    assert!(store.get_account("acc-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_wrong_key_yields_empty_credentials() {
    let db = create_test_db().await;
    let writer = DurableStore::new(db.clone(), crate::testing::test_cipher(), &StorageConfig::default());
    writer.upsert_account(&sample_account("acc-1")).await.unwrap();

    let other = SecretCipher::from_config_key("another passphrase").unwrap();
    let reader = DurableStore::new(db, other, &StorageConfig::default());
    let loaded = reader.get_account("acc-1").await.unwrap().unwrap();
    assert!(loaded.credentials.is_none());
    assert_eq!(loaded.name, "account acc-1");
}

#[tokio::test]
async fn test_edit_under_rotated_key_keeps_sealed_credentials() {
    let db = create_test_db().await;
    let original = DurableStore::new(db.clone(), crate::testing::test_cipher(), &StorageConfig::default());
    let account = sample_account("acc-1");
    original.upsert_account(&account).await.unwrap();

    let rotated = SecretCipher::from_config_key("another passphrase").unwrap();
    let rotated = DurableStore::new(db, rotated, &StorageConfig::default());
    let mut edited = rotated.get_account("acc-1").await.unwrap().unwrap();
    assert!(edited.credentials.is_none());
    edited.priority += 1;
    edited.schedulable = false;
    rotated.upsert_account(&edited).await.unwrap();

    let restored = original.get_account("acc-1").await.unwrap().unwrap();
    assert_eq!(restored.credentials, account.credentials);
    assert_eq!(restored.priority, account.priority + 1);
    assert!(!restored.schedulable);
}

#[tokio::test]
async fn test_clearing_both_fields_removes_credentials() {
    let store = durable_store().await;
    let mut account = sample_account("acc-1");
    store.upsert_account(&account).await.unwrap();

    account.credentials = None;
    account.sealed_credentials = None;
    store.upsert_account(&account).await.unwrap();
    assert!(store.get_account("acc-1").await.unwrap().unwrap().credentials.is_none());
}

#[tokio::test]
async fn test_expired_session_is_invisible() {
    let store = durable_store().await;
    let live = SessionRecord {
        id: "s1".to_string(),
        data: json!({"user": "admin"}),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    };
    let stale = SessionRecord {
        id: "s2".to_string(),
        data: json!({}),
        expires_at: Utc::now() - chrono::Duration::seconds(5),
    };
    store.set_session(SessionKind::Login, &live).await.unwrap();
    store.set_session(SessionKind::OAuth, &stale).await.unwrap();

    assert_eq!(
        store.get_session(SessionKind::Login, "s1").await.unwrap(),
        Some(live)
    );
    assert!(store.get_session(SessionKind::OAuth, "s2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_sticky_deleted_on_lookup() {
    let store = durable_store().await;
    let mapping = StickySessionMapping {
        fingerprint: "fp".to_string(),
        account_id: "acc-1".to_string(),
        account_type: AccountType::Dedicated,
        ttl_secs: 60,
        expires_at: Utc::now() - chrono::Duration::seconds(1),
    };
    store.set_sticky(&mapping).await.unwrap();

    assert!(store.get_sticky("fp").await.unwrap().is_none());
    assert!(!store.delete_sticky("fp").await.unwrap());
}

#[tokio::test]
async fn test_touch_sticky_extends_expiry() {
    let store = durable_store().await;
    let mapping = StickySessionMapping {
        fingerprint: "fp".to_string(),
        account_id: "acc-1".to_string(),
        account_type: AccountType::Shared,
        ttl_secs: 3600,
        expires_at: Utc::now() + chrono::Duration::seconds(10),
    };
    store.set_sticky(&mapping).await.unwrap();

    assert!(store.touch_sticky("fp").await.unwrap());
    let touched = store.get_sticky("fp").await.unwrap().unwrap();
    assert!(touched.expires_at > Utc::now() + chrono::Duration::seconds(3000));
}

#[tokio::test]
async fn test_concurrent_leases_counted() {
    let store = durable_store().await;
    let ttl = Duration::from_secs(60);

    let counts = join_all(
        (0..8).map(|i| {
            let store = store.clone();
            async move { store.acquire_lease("acc-1", &format!("r{i}"), ttl).await }
        }),
    )
    .await;
    assert!(counts.iter().all(Result::is_ok));
    assert_eq!(store.lease_count("acc-1").await.unwrap(), 8);

    for i in 0..8 {
        store.release_lease("acc-1", &format!("r{i}")).await.unwrap();
    }
    assert_eq!(store.lease_count("acc-1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_expired_lease_not_counted() {
    let store = durable_store().await;
    store
        .acquire_lease("acc-1", "short", Duration::from_millis(1))
        .await
        .unwrap();
    store
        .acquire_lease("acc-1", "long", Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.lease_count("acc-1").await.unwrap(), 1);
}

#[tokio::test]
async fn test_usage_increment_accumulates() {
    let store = durable_store().await;
    let principal = Principal::api_key("k1");
    let total = UsageBucketKey::total();
    let month = UsageBucketKey::new("claude-sonnet-4", Granularity::Month, "2025-05");
    let increment = UsageIncrement {
        principal: principal.clone(),
        buckets: vec![total.clone(), month.clone()],
        delta: UsageCounters {
            requests: 1,
            input_tokens: 100,
            output_tokens: 50,
            all_tokens: 150,
            ..UsageCounters::default()
        },
    };

    for _ in 0..3 {
        store.increment_usage(&increment).await.unwrap();
    }

    let counters = store.get_usage(&principal, &total).await.unwrap().unwrap();
    assert_eq!(counters.requests, 3);
    assert_eq!(counters.all_tokens, 450);
    assert_eq!(
        store.get_usage(&principal, &month).await.unwrap().unwrap().input_tokens,
        300
    );
    // 同 id 不同主体类型互不影响
    assert!(
        store
            .get_usage(&Principal::account("k1"), &total)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_cost_increment_and_reset() {
    let store = durable_store().await;
    let principal = Principal::api_key("k1");
    let weekly = CostBucketKey::new(CostPeriod::WeeklyOpus, "2025-W18");
    let increment = CostIncrement {
        principal: principal.clone(),
        buckets: vec![weekly.clone()],
        amount: 1.5,
    };
    store.increment_cost(&increment).await.unwrap();
    store.increment_cost(&increment).await.unwrap();
    assert_eq!(store.get_cost(&principal, &weekly).await.unwrap(), Some(3.0));

    assert_eq!(store.reset_all_usage_stats().await.unwrap(), 1);
    assert!(store.get_cost(&principal, &weekly).await.unwrap().is_none());
}

#[tokio::test]
async fn test_usage_records_trimmed_to_limit() {
    let db = create_test_db().await;
    let storage = StorageConfig {
        durable_usage_record_limit: 5,
        ..StorageConfig::default()
    };
    let store = DurableStore::new(db, crate::testing::test_cipher(), &storage);
    let principal = Principal::api_key("k1");

    for i in 0..8 {
        let record = UsageRecord {
            model: "claude-sonnet-4".to_string(),
            endpoint: "/v1/messages".to_string(),
            input_tokens: i,
            output_tokens: 1,
            cache_tokens: 0,
            cost: 0.01,
            response_time_ms: 120,
            status_code: 200,
            error: None,
            metadata: json!({"stream": true}),
            created_at: Utc::now(),
        };
        store.append_usage_record(&principal, &record).await.unwrap();
    }

    let records = store.recent_usage_records(&principal, 100).await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].input_tokens, 7);
    assert_eq!(records[4].input_tokens, 3);
    assert_eq!(records[0].metadata, json!({"stream": true}));
}

#[tokio::test]
async fn test_cleanup_removes_expired_rows() {
    let store = durable_store().await;
    store
        .set_session(
            SessionKind::Login,
            &SessionRecord {
                id: "old".to_string(),
                data: json!({}),
                expires_at: Utc::now() - chrono::Duration::minutes(1),
            },
        )
        .await
        .unwrap();
    store
        .acquire_lease("acc-1", "r1", Duration::from_millis(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = store.cleanup().await.unwrap();
    assert_eq!(report.sessions, 1);
    assert_eq!(report.leases, 1);
    assert_eq!(report.total(), 2);
}

#[tokio::test]
async fn test_system_stats() {
    let store = durable_store().await;
    store
        .upsert_api_key(&sample_api_key("k1", "h1"))
        .await
        .unwrap();
    let mut unschedulable = sample_account("acc-2");
    unschedulable.schedulable = false;
    store.upsert_account(&sample_account("acc-1")).await.unwrap();
    store.upsert_account(&unschedulable).await.unwrap();

    let stats = store.system_stats().await.unwrap();
    assert_eq!(stats.api_keys, 1);
    assert_eq!(stats.active_api_keys, 1);
    assert_eq!(stats.accounts, 2);
    assert_eq!(stats.schedulable_accounts, 1);
}

#[tokio::test]
async fn test_file_database_survives_reconnect() {
    let (_dir, config) = crate::testing::helpers::temp_sqlite_config();
    {
        let db = crate::database::init_database(&config).await.unwrap();
        crate::database::run_migrations(&db).await.unwrap();
        let store = DurableStore::new(db, crate::testing::test_cipher(), &StorageConfig::default());
        store
            .upsert_api_key(&sample_api_key("k1", "hash-1"))
            .await
            .unwrap();
        store.upsert_account(&sample_account("acc-1")).await.unwrap();
    }

    let db = crate::database::init_database(&config).await.unwrap();
    let store = DurableStore::new(db, crate::testing::test_cipher(), &StorageConfig::default());
    assert_eq!(
        store.find_api_key_by_hash("hash-1").await.unwrap().unwrap().id,
        "k1"
    );
    assert!(store.get_account("acc-1").await.unwrap().unwrap().credentials.is_some());
}
