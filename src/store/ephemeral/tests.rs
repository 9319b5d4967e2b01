use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::testing::helpers::{memory_store, sample_account, sample_api_key};
use crate::types::{AccountType, CostPeriod, Granularity, ProviderKind, SoftDelete};

#[tokio::test]
async fn test_api_key_hash_index() {
    let store = memory_store();
    store
        .upsert_api_key(&sample_api_key("k1", "hash-1"))
        .await
        .unwrap();

    let found = store.find_api_key_by_hash("hash-1").await.unwrap().unwrap();
    assert_eq!(found.id, "k1");
    assert!(store.find_api_key_by_hash("missing").await.unwrap().is_none());

    let err = store
        .upsert_api_key(&sample_api_key("k2", "hash-1"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn test_api_key_rotation_retires_old_hash() {
    let store = memory_store();
    let mut key = sample_api_key("k1", "hash-old");
    store.upsert_api_key(&key).await.unwrap();

    key.secret_hash = "hash-new".to_string();
    store.upsert_api_key(&key).await.unwrap();

    assert!(store.find_api_key_by_hash("hash-old").await.unwrap().is_none());
    assert!(store.kv().get("apikey_hash:hash-old").await.unwrap().is_none());
    assert_eq!(
        store.find_api_key_by_hash("hash-new").await.unwrap().unwrap().id,
        "k1"
    );

    // 旧哈希可以被其他密钥重新使用
    store
        .upsert_api_key(&sample_api_key("k2", "hash-old"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_soft_deleted_key_hidden_from_hash_lookup() {
    let store = memory_store();
    let mut key = sample_api_key("k1", "hash-1");
    key.deleted = Some(SoftDelete {
        deleted_by: "admin".to_string(),
        deleted_at: Utc::now(),
    });
    store.upsert_api_key(&key).await.unwrap();

    assert!(store.find_api_key_by_hash("hash-1").await.unwrap().is_none());
    assert_eq!(store.list_api_keys().await.unwrap().len(), 1);
    assert!(store.get_api_key("k1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_api_key_removes_index() {
    let store = memory_store();
    store
        .upsert_api_key(&sample_api_key("k1", "hash-1"))
        .await
        .unwrap();

    assert!(store.delete_api_key("k1").await.unwrap());
    assert!(!store.delete_api_key("k1").await.unwrap());
    assert!(store.kv().get("apikey_hash:hash-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_list_skips_corrupt_entries() {
    let store = memory_store();
    store
        .upsert_api_key(&sample_api_key("k1", "hash-1"))
        .await
        .unwrap();
    store.kv().set("apikey:broken", "{not json", None).await.unwrap();

    let keys = store.list_api_keys().await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].id, "k1");
}

#[tokio::test]
async fn test_account_round_trip_is_sealed() {
    let store = memory_store();
    let account = sample_account("acc-1");
    store.upsert_account(&account).await.unwrap();

    let raw = store.kv().get("account:acc-1").await.unwrap().unwrap();
    assert!(!raw.contains("sk-test-secret"));
    assert_eq!(store.get_account("acc-1").await.unwrap().unwrap(), account);
}

#[tokio::test]
async fn test_accounts_listed_by_priority() {
    let store = memory_store();
    let mut low = sample_account("low");
    low.priority = 10;
    let mut high = sample_account("high");
    high.priority = 90;
    store.upsert_account(&low).await.unwrap();
    store.upsert_account(&high).await.unwrap();

    let ids: Vec<String> = store
        .list_accounts()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec!["high", "low"]);
}

#[tokio::test]
async fn test_mismatched_credentials_rejected() {
    let store = memory_store();
    let mut account = sample_account("acc-1");
    account.provider = ProviderKind::Gemini;
    assert!(store.upsert_account(&account).await.is_err());
}

#[tokio::test]
async fn test_session_kinds_are_separate() {
    let store = memory_store();
    let record = SessionRecord {
        id: "s1".to_string(),
        data: json!({"user": "admin"}),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    };
    store.set_session(SessionKind::Login, &record).await.unwrap();

    assert_eq!(
        store.get_session(SessionKind::Login, "s1").await.unwrap(),
        Some(record)
    );
    assert!(store.get_session(SessionKind::OAuth, "s1").await.unwrap().is_none());
    assert!(store.delete_session(SessionKind::Login, "s1").await.unwrap());
}

#[tokio::test]
async fn test_already_expired_session_not_stored() {
    let store = memory_store();
    let record = SessionRecord {
        id: "s1".to_string(),
        data: json!(null),
        expires_at: Utc::now() - chrono::Duration::seconds(1),
    };
    store.set_session(SessionKind::OAuth, &record).await.unwrap();
    assert!(store.get_session(SessionKind::OAuth, "s1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sticky_expires_with_ttl() {
    let store = memory_store();
    let mapping = StickySessionMapping {
        fingerprint: "fp".to_string(),
        account_id: "acc-1".to_string(),
        account_type: AccountType::Shared,
        ttl_secs: 5,
        expires_at: Utc::now() + chrono::Duration::seconds(5),
    };
    store.set_sticky(&mapping).await.unwrap();

    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(store.touch_sticky("fp").await.unwrap());

    // 续期后从续期时刻重新计时
    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(store.get_sticky("fp").await.unwrap().is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(store.get_sticky("fp").await.unwrap().is_none());
    assert!(!store.touch_sticky("fp").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_leases_expire_and_release() {
    let store = memory_store();
    let ttl = Duration::from_secs(10);

    assert_eq!(store.acquire_lease("acc-1", "r1", ttl).await.unwrap(), 1);
    assert_eq!(store.acquire_lease("acc-1", "r2", ttl).await.unwrap(), 2);
    // 同一请求重复获取只刷新过期时间
    assert_eq!(store.acquire_lease("acc-1", "r2", ttl).await.unwrap(), 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(store.renew_lease("acc-1", "r1", ttl).await.unwrap(), 2);
    // 续期不存在的租约不会新增
    assert_eq!(store.renew_lease("acc-1", "ghost", ttl).await.unwrap(), 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(store.lease_count("acc-1").await.unwrap(), 1);
    assert_eq!(store.release_lease("acc-1", "r1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_usage_increments_every_bucket() {
    let store = memory_store();
    let principal = Principal::api_key("k1");
    let day = UsageBucketKey::new("*", Granularity::Day, "2025-05-01");
    let total = UsageBucketKey::total();
    let increment = UsageIncrement {
        principal: principal.clone(),
        buckets: vec![day.clone(), total.clone()],
        delta: UsageCounters {
            requests: 1,
            input_tokens: 100,
            output_tokens: 50,
            all_tokens: 150,
            ..UsageCounters::default()
        },
    };
    store.increment_usage(&increment).await.unwrap();
    store.increment_usage(&increment).await.unwrap();

    for bucket in [&day, &total] {
        let counters = store.get_usage(&principal, bucket).await.unwrap().unwrap();
        assert_eq!(counters.requests, 2);
        assert_eq!(counters.all_tokens, 300);
    }
    let missing = UsageBucketKey::new("*", Granularity::Day, "2025-05-02");
    assert!(store.get_usage(&principal, &missing).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cost_and_reset() {
    let store = memory_store();
    let principal = Principal::account("acc-1");
    let daily = CostBucketKey::new(CostPeriod::Daily, "2025-05-01");
    let increment = CostIncrement {
        principal: principal.clone(),
        buckets: vec![daily.clone(), CostBucketKey::new(CostPeriod::Total, "all")],
        amount: 0.25,
    };
    store.increment_cost(&increment).await.unwrap();
    store.increment_cost(&increment).await.unwrap();
    assert_eq!(store.get_cost(&principal, &daily).await.unwrap(), Some(0.5));

    assert_eq!(store.reset_all_usage_stats().await.unwrap(), 2);
    assert!(store.get_cost(&principal, &daily).await.unwrap().is_none());
}

#[tokio::test]
async fn test_usage_records_trimmed_newest_first() {
    let store = memory_store();
    let principal = Principal::api_key("k1");
    for i in 0..60 {
        let record = UsageRecord {
            model: "claude-sonnet-4".to_string(),
            endpoint: "/v1/messages".to_string(),
            input_tokens: i,
            output_tokens: 0,
            cache_tokens: 0,
            cost: 0.0,
            response_time_ms: 10,
            status_code: 200,
            error: None,
            metadata: json!({}),
            created_at: Utc::now(),
        };
        store.append_usage_record(&principal, &record).await.unwrap();
    }

    let records = store.recent_usage_records(&principal, 100).await.unwrap();
    assert_eq!(records.len(), 50);
    assert_eq!(records[0].input_tokens, 59);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_drops_empty_lease_sets() {
    let store = memory_store();
    store
        .acquire_lease("acc-1", "r1", Duration::from_secs(1))
        .await
        .unwrap();
    store
        .acquire_lease("acc-2", "r1", Duration::from_secs(60))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    let report = store.cleanup().await.unwrap();
    assert_eq!(report.leases, 1);
    assert_eq!(store.lease_count("acc-2").await.unwrap(), 1);
}

#[tokio::test]
async fn test_system_stats_counts_usable_entries() {
    let store = memory_store();
    store
        .upsert_api_key(&sample_api_key("k1", "h1"))
        .await
        .unwrap();
    let mut revoked = sample_api_key("k2", "h2");
    revoked.status = ApiKeyStatus::Revoked;
    store.upsert_api_key(&revoked).await.unwrap();
    store.upsert_account(&sample_account("acc-1")).await.unwrap();

    let stats = store.system_stats().await.unwrap();
    assert_eq!(stats.api_keys, 2);
    assert_eq!(stats.active_api_keys, 1);
    assert_eq!(stats.schedulable_accounts, 1);
}
