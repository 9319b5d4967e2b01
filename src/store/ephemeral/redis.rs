//! # Redis 键值后端
//!
//! 基于 `ConnectionManager`，断线自动重连。多步原子操作使用 Lua 脚本
//! 或 `MULTI` 管道，避免读改写竞争。

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};

use crate::config::RedisConfig;
use crate::error::{Result, StoreError};
use crate::{
    ldebug, linfo,
    logging::{LogComponent, LogStage},
};

/// 计数 +N，首次创建时设置过期；返回 {计数, 剩余毫秒}
static INCR_WINDOW: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
  ttl = tonumber(ARGV[2])
end
return {count, ttl}
",
    )
});

/// 清理过期成员后写入，集合本身的过期时间只延长不缩短
static ZSET_UPSERT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < tonumber(ARGV[4]) then
  redis.call('PEXPIRE', KEYS[1], ARGV[4])
end
return redis.call('ZCARD', KEYS[1])
",
    )
});

/// 仅续期已存在的成员
static ZSET_UPDATE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
if redis.call('ZSCORE', KEYS[1], ARGV[3]) then
  redis.call('ZADD', KEYS[1], 'XX', ARGV[2], ARGV[3])
  local ttl = redis.call('PTTL', KEYS[1])
  if ttl < tonumber(ARGV[4]) then
    redis.call('PEXPIRE', KEYS[1], ARGV[4])
  end
end
return redis.call('ZCARD', KEYS[1])
",
    )
});

static ZSET_REMOVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
redis.call('ZREM', KEYS[1], ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
return redis.call('ZCARD', KEYS[1])
",
    )
});

static ZSET_COUNT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
return redis.call('ZCARD', KEYS[1])
",
    )
});

const SCAN_BATCH: usize = 500;

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Redis 键值存储
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisKv {
    /// 建立连接
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Cache,
            "connect_redis",
            "正在连接 Redis"
        );

        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::config_with_source("Redis URL 无效", e))?;
        let conn = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| StoreError::connection("连接 Redis 超时"))??;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Cache,
            "redis_connected",
            "Redis 连接建立成功"
        );

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn k(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.conn().get(self.k(key)).await?)
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => {
                let ms = u64::try_from(millis(ttl).max(1)).unwrap_or(u64::MAX);
                conn.pset_ex::<_, _, ()>(self.k(key), value, ms).await?;
            }
            None => conn.set::<_, _, ()>(self.k(key), value).await?,
        }
        Ok(())
    }

    pub async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.k(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl).max(1));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed: u64 = self.conn().del(self.k(key)).await?;
        Ok(removed > 0)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        Ok(self.conn().pexpire(self.k(key), millis(ttl).max(1)).await?)
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let ms: i64 = self.conn().pttl(self.k(key)).await?;
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }

    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.conn().incr(self.k(key), delta).await?)
    }

    pub async fn incr_by_float(&self, key: &str, delta: f64) -> Result<f64> {
        Ok(self.conn().incr(self.k(key), delta).await?)
    }

    pub async fn incr_window(
        &self,
        key: &str,
        delta: i64,
        window: Duration,
    ) -> Result<(i64, Duration)> {
        let (count, remaining_ms): (i64, i64) = INCR_WINDOW
            .key(self.k(key))
            .arg(delta)
            .arg(millis(window).max(1))
            .invoke_async(&mut self.conn())
            .await?;
        Ok((
            count,
            Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0)),
        ))
    }

    pub async fn hincr_many(&self, keys: &[String], fields: &[(&str, i64)]) -> Result<()> {
        if keys.is_empty() || fields.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            let full_key = self.k(key);
            for (field, delta) in fields {
                pipe.hincr(&full_key, *field, *delta).ignore();
            }
        }
        pipe.query_async::<()>(&mut self.conn()).await?;
        Ok(())
    }

    pub async fn incr_float_many(&self, keys: &[String], delta: f64) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in keys {
            pipe.cmd("INCRBYFLOAT").arg(self.k(key)).arg(delta).ignore();
        }
        pipe.query_async::<()>(&mut self.conn()).await?;
        Ok(())
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.conn().hgetall(self.k(key)).await?)
    }

    async fn zset_script(
        &self,
        script: &Script,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> Result<u64> {
        let now = Utc::now().timestamp_millis();
        let count: u64 = script
            .key(self.k(key))
            .arg(now)
            .arg(now + millis(ttl))
            .arg(member)
            .arg(millis(ttl).max(1))
            .invoke_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    pub async fn zset_upsert(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        self.zset_script(&ZSET_UPSERT, key, member, ttl).await
    }

    pub async fn zset_update(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        self.zset_script(&ZSET_UPDATE, key, member, ttl).await
    }

    pub async fn zset_remove(&self, key: &str, member: &str) -> Result<u64> {
        let count: u64 = ZSET_REMOVE
            .key(self.k(key))
            .arg(Utc::now().timestamp_millis())
            .arg(member)
            .invoke_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    pub async fn zset_count(&self, key: &str) -> Result<u64> {
        let count: u64 = ZSET_COUNT
            .key(self.k(key))
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut self.conn())
            .await?;
        Ok(count)
    }

    pub async fn lpush_trim(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let full_key = self.k(key);
        let stop = isize::try_from(max_len).unwrap_or(isize::MAX) - 1;
        redis::pipe()
            .atomic()
            .lpush(&full_key, value)
            .ignore()
            .ltrim(&full_key, 0, stop)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await?;
        Ok(())
    }

    pub async fn lrange(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        Ok(self.conn().lrange(self.k(key), 0, stop).await?)
    }

    /// SCAN 游标遍历，返回去掉全局前缀后的键名。只用于管理路径
    pub async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.k(prefix));
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&self.key_prefix).map(str::to_string)),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.scan_prefix(prefix).await?;
        let mut removed = 0u64;
        let mut conn = self.conn();
        for chunk in keys.chunks(SCAN_BATCH) {
            let full: Vec<String> = chunk.iter().map(|k| self.k(k)).collect();
            let n: u64 = conn.del(full).await?;
            removed += n;
        }
        ldebug!(
            "system",
            LogStage::Cleanup,
            LogComponent::Cache,
            "delete_prefix",
            "按前缀删除键",
            prefix = prefix,
            removed = removed
        );
        Ok(removed)
    }

    pub async fn replace_index(
        &self,
        old_key: &str,
        new_key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().del(self.k(old_key)).ignore();
        match ttl {
            Some(ttl) => {
                let ms = u64::try_from(millis(ttl).max(1)).unwrap_or(u64::MAX);
                pipe.pset_ex(self.k(new_key), value, ms).ignore();
            }
            None => {
                pipe.set(self.k(new_key), value).ignore();
            }
        }
        pipe.query_async::<()>(&mut self.conn()).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisKv {
        let config = RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into()),
            key_prefix: format!("relay_test_{}:", uuid::Uuid::new_v4().simple()),
            ..RedisConfig::default()
        };
        RedisKv::connect(&config).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "需要本地 Redis"]
    async fn test_redis_window_and_leases() {
        let kv = connect().await;

        let (count, remaining) = kv.incr_window("w", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(count, 1);
        assert!(remaining <= Duration::from_secs(60));

        assert_eq!(kv.zset_upsert("c", "r1", Duration::from_secs(30)).await.unwrap(), 1);
        assert_eq!(kv.zset_upsert("c", "r2", Duration::from_secs(30)).await.unwrap(), 2);
        assert_eq!(kv.zset_remove("c", "r1").await.unwrap(), 1);
        assert_eq!(kv.zset_update("c", "r1", Duration::from_secs(30)).await.unwrap(), 1);

        kv.lpush_trim("l", "a", 2).await.unwrap();
        kv.lpush_trim("l", "b", 2).await.unwrap();
        kv.lpush_trim("l", "c", 2).await.unwrap();
        assert_eq!(kv.lrange("l", 10).await.unwrap(), vec!["c", "b"]);

        assert!(kv.delete_prefix("").await.unwrap() >= 3);
    }
}
