//! # 键值后端枚举
//!
//! 用枚举分发代替 trait object，内存与 Redis 两种实现共享同一组原语

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::memory::MemoryKv;
use super::redis::RedisKv;
use crate::config::{EphemeralBackend, RedisConfig};
use crate::error::Result;

/// 临时存储后端
#[derive(Debug, Clone)]
pub enum KvBackend {
    Memory(Arc<MemoryKv>),
    Redis(RedisKv),
}

impl KvBackend {
    /// 按配置创建后端
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        match config.backend {
            EphemeralBackend::Memory => Ok(Self::memory()),
            EphemeralBackend::Redis => Ok(Self::Redis(RedisKv::connect(config).await?)),
        }
    }

    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryKv::new()))
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            Self::Memory(kv) => kv.get(key),
            Self::Redis(kv) => kv.get(key).await,
        }
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        match self {
            Self::Memory(kv) => {
                kv.set(key, value, ttl);
                Ok(())
            }
            Self::Redis(kv) => kv.set(key, value, ttl).await,
        }
    }

    pub async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        match self {
            Self::Memory(kv) => Ok(kv.set_nx(key, value, ttl)),
            Self::Redis(kv) => kv.set_nx(key, value, ttl).await,
        }
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        match self {
            Self::Memory(kv) => Ok(kv.delete(key)),
            Self::Redis(kv) => kv.delete(key).await,
        }
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self {
            Self::Memory(kv) => Ok(kv.expire(key, ttl)),
            Self::Redis(kv) => kv.expire(key, ttl).await,
        }
    }

    /// 剩余存活时间；键不存在或无过期时间时为 `None`
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        match self {
            Self::Memory(kv) => Ok(kv.ttl(key)),
            Self::Redis(kv) => kv.ttl(key).await,
        }
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        match self {
            Self::Memory(kv) => kv.incr_by(key, delta),
            Self::Redis(kv) => kv.incr_by(key, delta).await,
        }
    }

    pub async fn incr_by_float(&self, key: &str, delta: f64) -> Result<f64> {
        match self {
            Self::Memory(kv) => kv.incr_by_float(key, delta),
            Self::Redis(kv) => kv.incr_by_float(key, delta).await,
        }
    }

    pub async fn incr_window(
        &self,
        key: &str,
        delta: i64,
        window: Duration,
    ) -> Result<(i64, Duration)> {
        match self {
            Self::Memory(kv) => kv.incr_window(key, delta, window),
            Self::Redis(kv) => kv.incr_window(key, delta, window).await,
        }
    }

    /// 多个哈希同时累加，整体原子
    pub async fn hincr_many(&self, keys: &[String], fields: &[(&str, i64)]) -> Result<()> {
        match self {
            Self::Memory(kv) => kv.hincr_many(keys, fields),
            Self::Redis(kv) => kv.hincr_many(keys, fields).await,
        }
    }

    pub async fn incr_float_many(&self, keys: &[String], delta: f64) -> Result<()> {
        match self {
            Self::Memory(kv) => kv.incr_float_many(keys, delta),
            Self::Redis(kv) => kv.incr_float_many(keys, delta).await,
        }
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        match self {
            Self::Memory(kv) => kv.hgetall(key),
            Self::Redis(kv) => kv.hgetall(key).await,
        }
    }

    pub async fn zset_upsert(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        match self {
            Self::Memory(kv) => kv.zset_upsert(key, member, ttl),
            Self::Redis(kv) => kv.zset_upsert(key, member, ttl).await,
        }
    }

    pub async fn zset_update(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        match self {
            Self::Memory(kv) => kv.zset_update(key, member, ttl),
            Self::Redis(kv) => kv.zset_update(key, member, ttl).await,
        }
    }

    pub async fn zset_remove(&self, key: &str, member: &str) -> Result<u64> {
        match self {
            Self::Memory(kv) => kv.zset_remove(key, member),
            Self::Redis(kv) => kv.zset_remove(key, member).await,
        }
    }

    pub async fn zset_count(&self, key: &str) -> Result<u64> {
        match self {
            Self::Memory(kv) => kv.zset_count(key),
            Self::Redis(kv) => kv.zset_count(key).await,
        }
    }

    pub async fn lpush_trim(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        match self {
            Self::Memory(kv) => kv.lpush_trim(key, value, max_len),
            Self::Redis(kv) => kv.lpush_trim(key, value, max_len).await,
        }
    }

    pub async fn lrange(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        match self {
            Self::Memory(kv) => kv.lrange(key, limit),
            Self::Redis(kv) => kv.lrange(key, limit).await,
        }
    }

    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            Self::Memory(kv) => Ok(kv.scan_prefix(prefix)),
            Self::Redis(kv) => kv.scan_prefix(prefix).await,
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        match self {
            Self::Memory(kv) => Ok(kv.delete_prefix(prefix)),
            Self::Redis(kv) => kv.delete_prefix(prefix).await,
        }
    }

    pub async fn replace_index(
        &self,
        old_key: &str,
        new_key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        match self {
            Self::Memory(kv) => {
                kv.replace_index(old_key, new_key, value, ttl);
                Ok(())
            }
            Self::Redis(kv) => kv.replace_index(old_key, new_key, value, ttl).await,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Redis(kv) => kv.ping().await,
        }
    }
}
