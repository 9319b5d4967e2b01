//! 粘性会话 TTL 与固定窗口限流（暂停时钟）

mod common;

use std::time::Duration;

use relay_store::config::StorageMode;
use relay_store::rate_limit::FixedWindowLimiter;
use relay_store::sticky::fingerprint;
use relay_store::store::KvBackend;
use relay_store::types::AccountType;

#[tokio::test(start_paused = true)]
async fn sticky_mapping_expires() {
    let context = common::context(StorageMode::Ephemeral).await;
    let sticky = context.sticky();
    let fp = fingerprint("system prompt + first user message");

    sticky
        .assign(&fp, "acc-1", AccountType::Shared, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(
        sticky.lookup(&fp).await.unwrap().map(|a| a.account_id),
        Some("acc-1".to_string())
    );

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(sticky.lookup(&fp).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn fixed_window_resets_after_window_and_block() {
    let limiter = FixedWindowLimiter::new(
        KvBackend::memory(),
        "client_api_rate",
        5,
        Duration::from_secs(60),
        Duration::from_secs(120),
    );

    for _ in 0..5 {
        assert!(limiter.consume("k1").await.unwrap().allowed);
    }
    assert!(!limiter.consume("k1").await.unwrap().allowed);

    // 窗口已过但仍在封禁期
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(!limiter.consume("k1").await.unwrap().allowed);

    tokio::time::advance(Duration::from_secs(60)).await;
    let decision = limiter.consume("k1").await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 4);
}
