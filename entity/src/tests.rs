//! # 实体定义测试
//!
//! 测试实体定义与表名、活动模型的正确性

#[cfg(test)]
mod tests {
    use crate::{api_keys, concurrency_leases, provider_accounts, usage_stats};
    use sea_orm::{EntityName, Set};

    #[tokio::test]
    async fn test_api_key_active_model() {
        let key = api_keys::ActiveModel {
            id: Set("key-1".to_string()),
            name: Set("测试密钥".to_string()),
            secret_hash: Set("abc123".to_string()),
            rate_limit_rpm: Set(60),
            restrict_models: Set(false),
            ..Default::default()
        };

        assert_eq!(key.id.as_ref(), "key-1");
        assert_eq!(key.rate_limit_rpm.as_ref(), &60);
        assert_eq!(key.restrict_models.as_ref(), &false);
    }

    #[tokio::test]
    async fn test_provider_account_active_model() {
        let account = provider_accounts::ActiveModel {
            id: Set("acct-1".to_string()),
            provider: Set("claude".to_string()),
            priority: Set(50),
            schedulable: Set(true),
            credentials_sealed: Set(None),
            ..Default::default()
        };

        assert_eq!(account.provider.as_ref(), "claude");
        assert_eq!(account.priority.as_ref(), &50);
        assert!(account.credentials_sealed.as_ref().is_none());
    }

    #[test]
    fn test_table_names() {
        assert_eq!(api_keys::Entity.table_name(), "api_keys");
        assert_eq!(provider_accounts::Entity.table_name(), "provider_accounts");
        assert_eq!(concurrency_leases::Entity.table_name(), "concurrency_leases");
        assert_eq!(usage_stats::Entity.table_name(), "usage_stats");
    }
}
