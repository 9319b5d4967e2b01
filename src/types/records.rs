//! # 业务记录类型
//!
//! API 密钥、上游账号、会话和粘性映射的强类型定义。
//! 反序列化对历史数据中的字符串数字/布尔宽松处理，见 [`super::conversion`]。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conversion::loose;
use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// API 密钥
// ---------------------------------------------------------------------------

/// API 密钥状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    #[default]
    Active,
    Expired,
    Revoked,
}

impl ApiKeyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl FromStr for ApiKeyStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "revoked" | "inactive" | "disabled" => Ok(Self::Revoked),
            other => Err(StoreError::validation(format!("未知的密钥状态: {other}"))),
        }
    }
}

/// 密钥级限额，0 表示不限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyLimits {
    #[serde(default, deserialize_with = "loose::u64")]
    pub requests_per_minute: u64,
    #[serde(default, deserialize_with = "loose::u64")]
    pub requests_per_day: u64,
    #[serde(default, deserialize_with = "loose::u64")]
    pub token_limit: u64,
    #[serde(default, deserialize_with = "loose::u64")]
    pub concurrency_limit: u64,
    #[serde(default, deserialize_with = "loose::f64")]
    pub daily_cost_limit: f64,
    #[serde(default, deserialize_with = "loose::f64")]
    pub weekly_opus_cost_limit: f64,
}

impl Default for ApiKeyLimits {
    fn default() -> Self {
        Self::for_plan(ApiKeyPlan::Basic)
    }
}

impl ApiKeyLimits {
    #[must_use]
    pub const fn for_plan(plan: ApiKeyPlan) -> Self {
        let (rpm, rpd) = match plan {
            ApiKeyPlan::Free => (20, 1_000),
            ApiKeyPlan::Basic => (60, 10_000),
            ApiKeyPlan::Pro => (200, 100_000),
        };
        Self {
            requests_per_minute: rpm,
            requests_per_day: rpd,
            token_limit: 0,
            concurrency_limit: 0,
            daily_cost_limit: 0.0,
            weekly_opus_cost_limit: 0.0,
        }
    }
}

/// 套餐
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyPlan {
    Free,
    #[default]
    Basic,
    Pro,
}

impl FromStr for ApiKeyPlan {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "pro" => Ok(Self::Pro),
            other => Err(StoreError::validation(format!("未知的套餐: {other}"))),
        }
    }
}

/// 模型与客户端白名单
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRestrictions {
    #[serde(default, deserialize_with = "loose::bool")]
    pub restrict_models: bool,
    #[serde(default, deserialize_with = "loose::string_list")]
    pub allowed_models: Vec<String>,
    #[serde(default, deserialize_with = "loose::bool")]
    pub restrict_clients: bool,
    #[serde(default, deserialize_with = "loose::string_list")]
    pub allowed_clients: Vec<String>,
}

impl ApiKeyRestrictions {
    #[must_use]
    pub fn allows_model(&self, model: &str) -> bool {
        !self.restrict_models || self.allowed_models.iter().any(|m| m == model)
    }

    #[must_use]
    pub fn allows_client(&self, client: &str) -> bool {
        !self.restrict_clients || self.allowed_clients.iter().any(|c| c == client)
    }
}

/// 生效时间窗口
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationWindow {
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub activates_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ActivationWindow {
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.activates_at.is_none_or(|t| t <= now)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// 软删除标记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDelete {
    pub deleted_by: String,
    pub deleted_at: DateTime<Utc>,
}

/// API 密钥记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub description: Option<String>,
    pub secret_hash: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub limits: ApiKeyLimits,
    #[serde(default)]
    pub restrictions: ApiKeyRestrictions,
    #[serde(default)]
    pub activation: ActivationWindow,
    #[serde(default)]
    pub status: ApiKeyStatus,
    #[serde(default)]
    pub deleted: Option<SoftDelete>,
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKeyRecord {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// 可用于认证：未删除、未吊销、已生效且未过期
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted()
            && self.status == ApiKeyStatus::Active
            && self.activation.is_active_at(now)
            && !self.activation.is_expired_at(now)
    }
}

// ---------------------------------------------------------------------------
// 上游账号
// ---------------------------------------------------------------------------

/// 上游服务商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Claude,
    ClaudeConsole,
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai-responses")]
    OpenAiResponses,
    Bedrock,
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
    Droid,
    Ccr,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::ClaudeConsole => "claude-console",
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::OpenAiResponses => "openai-responses",
            Self::Bedrock => "bedrock",
            Self::AzureOpenAi => "azure-openai",
            Self::Droid => "droid",
            Self::Ccr => "ccr",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| StoreError::validation(format!("未知的服务商: {s}")))
    }
}

/// OAuth 令牌组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "loose::string_list")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// API Key + 可选自定义地址
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredential {
    pub api_key: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Gemini 账号需要 GCP 项目号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiCredential {
    pub oauth: OAuthTokens,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// AWS 访问密钥
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub session_token: Option<String>,
    pub region: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Azure OpenAI 部署
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureCredential {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub api_version: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// 会话 Cookie（Droid 等 Web 渠道）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookieCredential {
    pub session_key: String,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// 上游账号凭据，按服务商区分
///
/// 只能整体替换；持久化前必须经过 [`crate::config::SecretCipher`] 封装。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum ProviderCredentials {
    Claude(OAuthTokens),
    ClaudeConsole(ApiKeyCredential),
    Gemini(GeminiCredential),
    #[serde(rename = "openai")]
    OpenAi(OAuthTokens),
    #[serde(rename = "openai-responses")]
    OpenAiResponses(ApiKeyCredential),
    Bedrock(AwsCredential),
    #[serde(rename = "azure-openai")]
    AzureOpenAi(AzureCredential),
    Droid(SessionCookieCredential),
    Ccr(ApiKeyCredential),
}

impl ProviderCredentials {
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Claude(_) => ProviderKind::Claude,
            Self::ClaudeConsole(_) => ProviderKind::ClaudeConsole,
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::OpenAi(_) => ProviderKind::OpenAi,
            Self::OpenAiResponses(_) => ProviderKind::OpenAiResponses,
            Self::Bedrock(_) => ProviderKind::Bedrock,
            Self::AzureOpenAi(_) => ProviderKind::AzureOpenAi,
            Self::Droid(_) => ProviderKind::Droid,
            Self::Ccr(_) => ProviderKind::Ccr,
        }
    }
}

// 凭据内容不进日志
impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderCredentials({}, ..)", self.kind())
    }
}

/// 账号状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
    Error,
    Unauthorized,
    RateLimited,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "error" => Ok(Self::Error),
            "unauthorized" => Ok(Self::Unauthorized),
            "rate_limited" => Ok(Self::RateLimited),
            other => Err(StoreError::validation(format!("未知的账号状态: {other}"))),
        }
    }
}

/// 账号归属类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    #[default]
    Shared,
    Dedicated,
    Group,
}

impl AccountType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Dedicated => "dedicated",
            Self::Group => "group",
        }
    }
}

impl FromStr for AccountType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "shared" => Ok(Self::Shared),
            "dedicated" => Ok(Self::Dedicated),
            "group" => Ok(Self::Group),
            other => Err(StoreError::validation(format!("未知的账号类型: {other}"))),
        }
    }
}

/// 上游账号记录
///
/// `credentials` 不参与序列化：落盘与缓存时由存储层单独封装为密文。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccountRecord {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    #[serde(skip)]
    pub credentials: Option<ProviderCredentials>,
    /// 当前密钥解不开的凭据密文。`credentials` 为空时存储层原样写回，
    /// 两者都清空才会删除凭据
    #[serde(skip)]
    pub sealed_credentials: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, deserialize_with = "loose::i32")]
    pub priority: i32,
    #[serde(default = "default_true", deserialize_with = "loose::bool")]
    pub schedulable: bool,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default, deserialize_with = "loose::opt_string")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "loose::opt_datetime")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const fn default_true() -> bool {
    true
}

impl ProviderAccountRecord {
    /// 凭据与声明的服务商必须一致
    pub fn validate(&self) -> Result<()> {
        if let Some(credentials) = &self.credentials {
            crate::ensure_valid!(
                credentials.kind() == self.provider,
                "账号 {} 的凭据类型 {} 与服务商 {} 不一致",
                self.id,
                credentials.kind(),
                self.provider
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 会话与粘性映射
// ---------------------------------------------------------------------------

/// 会话类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// 管理端登录会话
    Login,
    /// OAuth 授权握手（PKCE 校验码、state）
    OAuth,
}

impl SessionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "session",
            Self::OAuth => "oauth",
        }
    }

    /// OAuth 握手默认 10 分钟
    #[must_use]
    pub const fn default_ttl_secs(self) -> u64 {
        match self {
            Self::Login => 86_400,
            Self::OAuth => 600,
        }
    }
}

/// 会话记录，`data` 由认证层自行解释
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub data: Value,
    pub expires_at: DateTime<Utc>,
}

/// 粘性会话映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySessionMapping {
    pub fingerprint: String,
    pub account_id: String,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(deserialize_with = "loose::u64")]
    pub ttl_secs: u64,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_key() -> ApiKeyRecord {
        let now = Utc::now();
        ApiKeyRecord {
            id: "k1".into(),
            name: "test".into(),
            description: None,
            secret_hash: "abc".into(),
            preview: "cr_abcd...wxyz".into(),
            owner_id: None,
            limits: ApiKeyLimits::default(),
            restrictions: ApiKeyRestrictions::default(),
            activation: ActivationWindow::default(),
            status: ApiKeyStatus::Active,
            deleted: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_key_usability() {
        let now = Utc::now();
        let mut key = sample_key();
        assert!(key.is_usable_at(now));

        key.activation.activates_at = Some(now + Duration::hours(1));
        assert!(!key.is_usable_at(now));

        key.activation.activates_at = None;
        key.activation.expires_at = Some(now - Duration::seconds(1));
        assert!(!key.is_usable_at(now));

        key.activation.expires_at = None;
        key.deleted = Some(SoftDelete {
            deleted_by: "admin".into(),
            deleted_at: now,
        });
        assert!(!key.is_usable_at(now));
    }

    #[test]
    fn test_legacy_string_fields_are_coerced() {
        let mut raw = serde_json::to_value(sample_key()).unwrap();
        raw["limits"]["requests_per_minute"] = json!("10");
        raw["limits"]["daily_cost_limit"] = json!("");
        raw["restrictions"]["restrict_models"] = json!("true");
        raw["restrictions"]["allowed_models"] = json!("claude-sonnet-4, claude-opus-4");
        raw["last_used_at"] = json!("");

        let key: ApiKeyRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(key.limits.requests_per_minute, 10);
        assert!(key.limits.daily_cost_limit.abs() < f64::EPSILON);
        assert!(key.restrictions.allows_model("claude-opus-4"));
        assert!(!key.restrictions.allows_model("gpt-4o"));
        assert!(key.last_used_at.is_none());
    }

    #[test]
    fn test_plan_defaults() {
        assert_eq!(ApiKeyLimits::for_plan(ApiKeyPlan::Free).requests_per_minute, 20);
        assert_eq!(ApiKeyLimits::for_plan(ApiKeyPlan::Basic).requests_per_day, 10_000);
        assert_eq!(ApiKeyLimits::for_plan(ApiKeyPlan::Pro).requests_per_day, 100_000);
    }

    #[test]
    fn test_credentials_tagged_by_provider() {
        let creds = ProviderCredentials::Bedrock(AwsCredential {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "us-east-1".into(),
            extra: BTreeMap::new(),
        });
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value["provider"], "bedrock");
        assert_eq!(creds.kind(), ProviderKind::Bedrock);
        assert!(!format!("{creds:?}").contains("secret"));

        let parsed: ProviderCredentials = serde_json::from_value(json!({
            "provider": "claude",
            "access_token": "at",
            "refresh_token": "",
            "scopes": "user:inference"
        }))
        .unwrap();
        match parsed {
            ProviderCredentials::Claude(tokens) => {
                assert!(tokens.refresh_token.is_none());
                assert_eq!(tokens.scopes, vec!["user:inference"]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("azure-openai".parse::<ProviderKind>().unwrap(), ProviderKind::AzureOpenAi);
        assert_eq!(ProviderKind::OpenAiResponses.as_str(), "openai-responses");
        assert!("mistral".parse::<ProviderKind>().is_err());
    }
}
