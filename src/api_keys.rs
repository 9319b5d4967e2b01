//! # API 密钥服务
//!
//! 签发、校验、轮换与软删除。明文密钥只在签发和轮换时返回一次，
//! 存储里只有 SHA-256 哈希和脱敏预览。

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::error::{Result, StoreError};
use crate::store::SharedStore;
use crate::types::{
    ActivationWindow, ApiKeyLimits, ApiKeyPlan, ApiKeyRecord, ApiKeyRestrictions, ApiKeyStatus,
    Principal, SoftDelete, UsageBucketKey,
};
use crate::{
    ldebug, linfo, lwarn,
    logging::{LogComponent, LogStage},
};

/// 随机部分长度
const SECRET_RANDOM_LEN: usize = 32;
/// 哈希冲突时的最大尝试次数
const MAX_ISSUE_ATTEMPTS: usize = 3;

/// SHA-256 十六进制
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// 前 7 位 + `...` + 后 4 位
#[must_use]
pub fn preview_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 11 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// 新密钥参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewApiKey {
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Option<String>,
    /// 未显式给出限额时按套餐取默认值
    pub plan: ApiKeyPlan,
    pub limits: Option<ApiKeyLimits>,
    pub restrictions: ApiKeyRestrictions,
    pub activation: ActivationWindow,
}

/// 签发结果，`secret` 只出现这一次
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub record: ApiKeyRecord,
    pub secret: String,
}

/// 部分更新，`None` 表示不修改
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub limits: Option<ApiKeyLimits>,
    pub restrictions: Option<ApiKeyRestrictions>,
    pub activation: Option<ActivationWindow>,
    pub status: Option<ApiKeyStatus>,
}

#[derive(Clone)]
pub struct ApiKeyService {
    store: SharedStore,
    prefix: String,
}

impl std::fmt::Debug for ApiKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyService")
            .field("store", &self.store.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ApiKeyService {
    #[must_use]
    pub fn new(store: SharedStore, security: &SecurityConfig) -> Self {
        Self {
            store,
            prefix: security.api_key_prefix.clone(),
        }
    }

    fn generate_secret(&self) -> String {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SECRET_RANDOM_LEN)
            .map(char::from)
            .collect();
        format!("{}{random}", self.prefix)
    }

    /// 签发新密钥
    pub async fn issue(&self, new: NewApiKey) -> Result<IssuedApiKey> {
        let name = new.name.trim();
        crate::ensure_valid!(!name.is_empty(), "密钥名称不能为空");

        let now = Utc::now();
        let mut record = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: new.description,
            secret_hash: String::new(),
            preview: String::new(),
            owner_id: new.owner_id,
            limits: new.limits.unwrap_or_else(|| ApiKeyLimits::for_plan(new.plan)),
            restrictions: new.restrictions,
            activation: new.activation,
            status: ApiKeyStatus::Active,
            deleted: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };

        let secret = self.install_new_secret(&mut record).await?;
        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "issue",
            "API 密钥已签发",
            key_id = record.id.as_str(),
            preview = record.preview.as_str()
        );
        Ok(IssuedApiKey { record, secret })
    }

    // 生成密钥并写入；哈希冲突时重新生成
    async fn install_new_secret(&self, record: &mut ApiKeyRecord) -> Result<String> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let secret = self.generate_secret();
            record.secret_hash = hash_secret(&secret);
            record.preview = preview_secret(&secret);
            match self.store.upsert_api_key(record).await {
                Ok(()) => return Ok(secret),
                Err(e) if e.is_conflict() => {
                    lwarn!(
                        "system",
                        LogStage::Authentication,
                        LogComponent::ApiKey,
                        "hash_conflict",
                        "密钥哈希冲突，重新生成",
                        key_id = record.id.as_str(),
                        attempt = attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::internal(format!(
            "连续 {MAX_ISSUE_ATTEMPTS} 次生成的密钥哈希冲突"
        )))
    }

    /// 认证入口：密钥不存在、已删除、已吊销、未生效或已过期时返回 `None`
    pub async fn verify_api_key(&self, secret: &str) -> Result<Option<ApiKeyRecord>> {
        self.verify_api_key_at(secret, Utc::now()).await
    }

    pub async fn verify_api_key_at(
        &self,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ApiKeyRecord>> {
        if secret.is_empty() {
            return Ok(None);
        }
        let Some(mut record) = self.store.find_api_key_by_hash(&hash_secret(secret)).await? else {
            return Ok(None);
        };

        if record.status == ApiKeyStatus::Active && record.activation.is_expired_at(now) {
            record.status = ApiKeyStatus::Expired;
            record.updated_at = now;
            self.store.upsert_api_key(&record).await?;
            linfo!(
                "system",
                LogStage::Authentication,
                LogComponent::ApiKey,
                "mark_expired",
                "API 密钥已过期",
                key_id = record.id.as_str()
            );
            return Ok(None);
        }

        if !record.is_usable_at(now) {
            ldebug!(
                "system",
                LogStage::Authentication,
                LogComponent::ApiKey,
                "verify_rejected",
                "API 密钥不可用",
                key_id = record.id.as_str(),
                status = record.status.as_str()
            );
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// 记录最近使用时间
    pub async fn touch_last_used(&self, id: &str) -> Result<bool> {
        let Some(mut record) = self.store.get_api_key(id).await? else {
            return Ok(false);
        };
        record.last_used_at = Some(Utc::now());
        self.store.upsert_api_key(&record).await?;
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        self.store.get_api_key(id).await
    }

    /// 按创建时间倒序
    pub async fn list(&self, include_deleted: bool) -> Result<Vec<ApiKeyRecord>> {
        let mut keys: Vec<ApiKeyRecord> = self
            .store
            .list_api_keys()
            .await?
            .into_iter()
            .filter(|k| include_deleted || !k.is_deleted())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    /// 已软删除的密钥不能修改
    pub async fn update(&self, id: &str, update: ApiKeyUpdate) -> Result<Option<ApiKeyRecord>> {
        let Some(mut record) = self.store.get_api_key(id).await? else {
            return Ok(None);
        };
        crate::ensure_valid!(!record.is_deleted(), "密钥已删除: {}", id);

        if let Some(name) = update.name {
            let name = name.trim();
            crate::ensure_valid!(!name.is_empty(), "密钥名称不能为空");
            record.name = name.to_string();
        }
        if let Some(description) = update.description {
            record.description = description;
        }
        if let Some(limits) = update.limits {
            record.limits = limits;
        }
        if let Some(restrictions) = update.restrictions {
            record.restrictions = restrictions;
        }
        if let Some(activation) = update.activation {
            record.activation = activation;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        record.updated_at = Utc::now();
        self.store.upsert_api_key(&record).await?;
        Ok(Some(record))
    }

    /// 换发新密钥，旧密钥立即失效
    pub async fn rotate(&self, id: &str) -> Result<Option<IssuedApiKey>> {
        let Some(mut record) = self.store.get_api_key(id).await? else {
            return Ok(None);
        };
        crate::ensure_valid!(!record.is_deleted(), "密钥已删除: {}", id);

        record.updated_at = Utc::now();
        let secret = self.install_new_secret(&mut record).await?;
        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "rotate",
            "API 密钥已轮换",
            key_id = id,
            preview = record.preview.as_str()
        );
        Ok(Some(IssuedApiKey { record, secret }))
    }

    /// 软删除：保留记录用于统计归属，认证不再可见
    pub async fn soft_delete(&self, id: &str, actor: &str) -> Result<bool> {
        let Some(mut record) = self.store.get_api_key(id).await? else {
            return Ok(false);
        };
        if record.is_deleted() {
            return Ok(false);
        }
        let now = Utc::now();
        record.deleted = Some(SoftDelete {
            deleted_by: actor.to_string(),
            deleted_at: now,
        });
        record.updated_at = now;
        self.store.upsert_api_key(&record).await?;
        linfo!(
            "system",
            LogStage::Authentication,
            LogComponent::ApiKey,
            "soft_delete",
            "API 密钥已删除",
            key_id = id,
            actor = actor
        );
        Ok(true)
    }

    pub async fn restore(&self, id: &str) -> Result<bool> {
        let Some(mut record) = self.store.get_api_key(id).await? else {
            return Ok(false);
        };
        if !record.is_deleted() {
            return Ok(false);
        }
        record.deleted = None;
        record.updated_at = Utc::now();
        self.store.upsert_api_key(&record).await?;
        Ok(true)
    }

    /// 物理删除，仅限没有使用记录的密钥
    pub async fn hard_delete(&self, id: &str) -> Result<bool> {
        let principal = Principal::api_key(id);
        let has_stats = self
            .store
            .get_usage(&principal, &UsageBucketKey::total())
            .await?
            .is_some_and(|c| !c.is_empty());
        let has_records = !self
            .store
            .recent_usage_records(&principal, 1)
            .await?
            .is_empty();
        if has_stats || has_records {
            return Err(StoreError::conflict("api_key_usage", id));
        }
        self.store.delete_api_key(id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::testing::helpers::memory_store;
    use crate::types::{UsageCounters, UsageIncrement};

    fn service() -> ApiKeyService {
        ApiKeyService::new(Arc::new(memory_store()), &SecurityConfig::default())
    }

    fn named(name: &str) -> NewApiKey {
        NewApiKey {
            name: name.to_string(),
            ..NewApiKey::default()
        }
    }

    #[test]
    fn test_preview_masks_middle() {
        assert_eq!(
            preview_secret("cr_abcdefghijklmnopqrstuvwxyz012345"),
            "cr_abcd...2345"
        );
        assert_eq!(preview_secret("short"), "*****");
    }

    #[tokio::test]
    async fn test_issue_and_verify() {
        let service = service();
        let issued = service.issue(named("ci")).await.unwrap();

        assert!(issued.secret.starts_with("cr_"));
        assert_eq!(issued.secret.len(), 3 + SECRET_RANDOM_LEN);
        assert_eq!(issued.record.secret_hash, hash_secret(&issued.secret));
        assert_eq!(issued.record.limits, ApiKeyLimits::for_plan(ApiKeyPlan::Basic));

        let verified = service.verify_api_key(&issued.secret).await.unwrap().unwrap();
        assert_eq!(verified.id, issued.record.id);
        assert!(service.verify_api_key("cr_wrong").await.unwrap().is_none());
        assert!(service.verify_api_key("").await.unwrap().is_none());
    }

    #[rstest]
    #[case(ApiKeyPlan::Free, 20, 1_000)]
    #[case(ApiKeyPlan::Basic, 60, 10_000)]
    #[case(ApiKeyPlan::Pro, 200, 100_000)]
    #[tokio::test]
    async fn test_plan_defaults(#[case] plan: ApiKeyPlan, #[case] rpm: u64, #[case] rpd: u64) {
        let issued = service()
            .issue(NewApiKey {
                plan,
                ..named("plan")
            })
            .await
            .unwrap();
        assert_eq!(issued.record.limits.requests_per_minute, rpm);
        assert_eq!(issued.record.limits.requests_per_day, rpd);
    }

    #[tokio::test]
    async fn test_blank_name_rejected() {
        assert!(service().issue(named("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_soft_deleted_key_fails_verification() {
        let service = service();
        let issued = service.issue(named("ci")).await.unwrap();
        let id = issued.record.id.clone();

        assert!(service.soft_delete(&id, "admin").await.unwrap());
        assert!(!service.soft_delete(&id, "admin").await.unwrap());
        assert!(service.verify_api_key(&issued.secret).await.unwrap().is_none());
        assert!(service.list(false).await.unwrap().is_empty());
        assert_eq!(service.list(true).await.unwrap().len(), 1);

        assert!(service.restore(&id).await.unwrap());
        assert!(service.verify_api_key(&issued.secret).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_key_marked_on_verify() {
        let service = service();
        let issued = service
            .issue(NewApiKey {
                activation: ActivationWindow {
                    activates_at: None,
                    expires_at: Some(Utc::now() + Duration::hours(1)),
                },
                ..named("temp")
            })
            .await
            .unwrap();

        let later = Utc::now() + Duration::hours(2);
        assert!(
            service
                .verify_api_key_at(&issued.secret, later)
                .await
                .unwrap()
                .is_none()
        );
        let stored = service.get(&issued.record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApiKeyStatus::Expired);
    }

    #[tokio::test]
    async fn test_not_yet_active_key_rejected() {
        let service = service();
        let issued = service
            .issue(NewApiKey {
                activation: ActivationWindow {
                    activates_at: Some(Utc::now() + Duration::days(1)),
                    expires_at: None,
                },
                ..named("future")
            })
            .await
            .unwrap();
        assert!(service.verify_api_key(&issued.secret).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_invalidates_old_secret() {
        let service = service();
        let issued = service.issue(named("ci")).await.unwrap();
        let rotated = service.rotate(&issued.record.id).await.unwrap().unwrap();

        assert_ne!(rotated.secret, issued.secret);
        assert!(service.verify_api_key(&issued.secret).await.unwrap().is_none());
        assert_eq!(
            service
                .verify_api_key(&rotated.secret)
                .await
                .unwrap()
                .unwrap()
                .id,
            issued.record.id
        );
        assert!(service.rotate("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_revoke() {
        let service = service();
        let issued = service.issue(named("ci")).await.unwrap();
        let updated = service
            .update(
                &issued.record.id,
                ApiKeyUpdate {
                    status: Some(ApiKeyStatus::Revoked),
                    description: Some(Some("disabled by ops".to_string())),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("disabled by ops"));
        assert!(service.verify_api_key(&issued.secret).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hard_delete_blocked_by_usage() {
        let service = service();
        let used = service.issue(named("used")).await.unwrap();
        let unused = service.issue(named("unused")).await.unwrap();

        service
            .store
            .increment_usage(&UsageIncrement {
                principal: Principal::api_key(&used.record.id),
                buckets: vec![UsageBucketKey::total()],
                delta: UsageCounters {
                    requests: 1,
                    ..UsageCounters::default()
                },
            })
            .await
            .unwrap();

        let err = service.hard_delete(&used.record.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(service.hard_delete(&unused.record.id).await.unwrap());
        assert!(!service.hard_delete(&unused.record.id).await.unwrap());
    }
}
