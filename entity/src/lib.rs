//! # Entity 模块
//!
//! 包含存储层所有 Sea-ORM 实体定义，每个实体族对应一张表

pub mod api_keys;
pub mod concurrency_leases;
pub mod cost_stats;
pub mod oauth_sessions;
pub mod provider_accounts;
pub mod sessions;
pub mod sticky_sessions;
pub mod usage_records;
pub mod usage_stats;

pub use api_keys::Entity as ApiKeys;
pub use concurrency_leases::Entity as ConcurrencyLeases;
pub use cost_stats::Entity as CostStats;
pub use oauth_sessions::Entity as OAuthSessions;
pub use provider_accounts::Entity as ProviderAccounts;
pub use sessions::Entity as Sessions;
pub use sticky_sessions::Entity as StickySessions;
pub use usage_records::Entity as UsageRecords;
pub use usage_stats::Entity as UsageStats;

#[cfg(test)]
mod tests;
