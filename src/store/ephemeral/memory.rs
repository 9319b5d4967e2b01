//! # 进程内键值后端
//!
//! 单实例部署和测试使用。所有原语在同一把锁内完成，因此天然原子。
//! 过期时间基于 `tokio::time::Instant`，测试中可以用暂停时钟推进。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, StoreError};
use crate::types::conversion::{parse_f64_str, parse_i64_str};

/// 过期时刻上限，避免 `Instant` 加法溢出
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

#[derive(Debug, Clone)]
enum Slot {
    Str(String),
    Hash(HashMap<String, i64>),
    /// 成员 -> 过期时刻
    Zset(HashMap<String, Instant>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(slot: Slot, ttl: Option<Duration>) -> Self {
        Self {
            slot,
            expires_at: ttl.map(|t| deadline(Instant::now(), t)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 进程内键值存储
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, Entry>>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::cache(format!("键类型不匹配: {key}"))
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 取出未过期的条目，过期条目顺手删除
    fn live<'a>(data: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if data.get(key).is_some_and(|e| e.is_expired(now)) {
            data.remove(key);
        }
        data.get_mut(key)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut data = self.lock();
        match Self::live(&mut data, key) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Str(s), ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.lock()
            .insert(key.to_string(), Entry::new(Slot::Str(value.to_string()), ttl));
    }

    pub fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let mut data = self.lock();
        if Self::live(&mut data, key).is_some() {
            return false;
        }
        data.insert(key.to_string(), Entry::new(Slot::Str(value.to_string()), ttl));
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut data = self.lock();
        let existed = Self::live(&mut data, key).is_some();
        data.remove(key);
        existed
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        let mut data = self.lock();
        match Self::live(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(deadline(Instant::now(), ttl));
                true
            }
            None => false,
        }
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut data = self.lock();
        let entry = Self::live(&mut data, key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut data = self.lock();
        let (next, expires_at) = match Self::live(&mut data, key) {
            None => (delta, None),
            Some(Entry {
                slot: Slot::Str(s),
                expires_at,
            }) => (parse_i64_str(s)? + delta, *expires_at),
            Some(_) => return Err(wrong_type(key)),
        };
        data.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    pub fn incr_by_float(&self, key: &str, delta: f64) -> Result<f64> {
        let mut data = self.lock();
        let (next, expires_at) = match Self::live(&mut data, key) {
            None => (delta, None),
            Some(Entry {
                slot: Slot::Str(s),
                expires_at,
            }) => (parse_f64_str(s)? + delta, *expires_at),
            Some(_) => return Err(wrong_type(key)),
        };
        data.insert(
            key.to_string(),
            Entry {
                slot: Slot::Str(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    /// 固定窗口计数：首次创建时设置 TTL，返回 (当前计数, 窗口剩余时间)
    pub fn incr_window(&self, key: &str, delta: i64, window: Duration) -> Result<(i64, Duration)> {
        let mut data = self.lock();
        let now = Instant::now();
        match Self::live(&mut data, key) {
            None => {
                data.insert(key.to_string(), Entry::new(Slot::Str(delta.to_string()), Some(window)));
                Ok((delta, window))
            }
            Some(entry) => {
                let Slot::Str(s) = &entry.slot else {
                    return Err(wrong_type(key));
                };
                let next = parse_i64_str(s)? + delta;
                entry.slot = Slot::Str(next.to_string());
                let remaining = match entry.expires_at {
                    Some(at) => at.saturating_duration_since(now),
                    None => {
                        entry.expires_at = Some(deadline(now, window));
                        window
                    }
                };
                Ok((next, remaining))
            }
        }
    }

    /// 对多个哈希累加同一组字段，一次加锁完成
    pub fn hincr_many(&self, keys: &[String], fields: &[(&str, i64)]) -> Result<()> {
        let mut data = self.lock();
        for key in keys {
            if Self::live(&mut data, key).is_none() {
                data.insert(key.clone(), Entry::new(Slot::Hash(HashMap::new()), None));
            }
            if !matches!(data.get(key), Some(Entry { slot: Slot::Hash(_), .. })) {
                return Err(wrong_type(key));
            }
        }
        for key in keys {
            if let Some(Entry {
                slot: Slot::Hash(hash),
                ..
            }) = data.get_mut(key)
            {
                for (field, delta) in fields {
                    *hash.entry((*field).to_string()).or_insert(0) += delta;
                }
            }
        }
        Ok(())
    }

    /// 对多个浮点计数累加同一增量
    pub fn incr_float_many(&self, keys: &[String], delta: f64) -> Result<()> {
        let mut data = self.lock();
        let mut next = Vec::with_capacity(keys.len());
        for key in keys {
            let (value, expires_at) = match Self::live(&mut data, key) {
                None => (delta, None),
                Some(Entry {
                    slot: Slot::Str(s),
                    expires_at,
                }) => (parse_f64_str(s)? + delta, *expires_at),
                Some(_) => return Err(wrong_type(key)),
            };
            next.push((key, value, expires_at));
        }
        for (key, value, expires_at) in next {
            data.insert(
                key.clone(),
                Entry {
                    slot: Slot::Str(value.to_string()),
                    expires_at,
                },
            );
        }
        Ok(())
    }

    pub fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut data = self.lock();
        match Self::live(&mut data, key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                slot: Slot::Hash(hash),
                ..
            }) => Ok(hash.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// 取出（必要时创建）有序集合并清除已过期成员
    fn zset<'a>(
        data: &'a mut HashMap<String, Entry>,
        key: &str,
        create: bool,
    ) -> Result<Option<&'a mut HashMap<String, Instant>>> {
        if Self::live(data, key).is_none() {
            if !create {
                return Ok(None);
            }
            data.insert(key.to_string(), Entry::new(Slot::Zset(HashMap::new()), None));
        }
        match data.get_mut(key) {
            Some(Entry {
                slot: Slot::Zset(set),
                ..
            }) => {
                let now = Instant::now();
                set.retain(|_, at| *at > now);
                Ok(Some(set))
            }
            _ => Err(wrong_type(key)),
        }
    }

    pub fn zset_upsert(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        let mut data = self.lock();
        let Some(set) = Self::zset(&mut data, key, true)? else {
            return Ok(0);
        };
        set.insert(member.to_string(), deadline(Instant::now(), ttl));
        Ok(set.len() as u64)
    }

    /// 仅更新已存在的成员
    pub fn zset_update(&self, key: &str, member: &str, ttl: Duration) -> Result<u64> {
        let mut data = self.lock();
        let Some(set) = Self::zset(&mut data, key, false)? else {
            return Ok(0);
        };
        if let Some(at) = set.get_mut(member) {
            *at = deadline(Instant::now(), ttl);
        }
        Ok(set.len() as u64)
    }

    pub fn zset_remove(&self, key: &str, member: &str) -> Result<u64> {
        let mut data = self.lock();
        let Some(set) = Self::zset(&mut data, key, false)? else {
            return Ok(0);
        };
        set.remove(member);
        let count = set.len() as u64;
        if count == 0 {
            data.remove(key);
        }
        Ok(count)
    }

    pub fn zset_count(&self, key: &str) -> Result<u64> {
        let mut data = self.lock();
        Ok(Self::zset(&mut data, key, false)?.map_or(0, |set| set.len() as u64))
    }

    /// 头插并截断到 `max_len`
    pub fn lpush_trim(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut data = self.lock();
        if Self::live(&mut data, key).is_none() {
            data.insert(key.to_string(), Entry::new(Slot::List(VecDeque::new()), None));
        }
        let Some(Entry {
            slot: Slot::List(list),
            ..
        }) = data.get_mut(key)
        else {
            return Err(wrong_type(key));
        };
        list.push_front(value.to_string());
        list.truncate(max_len);
        Ok(())
    }

    pub fn lrange(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut data = self.lock();
        match Self::live(&mut data, key) {
            None => Ok(Vec::new()),
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    pub fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let mut data = self.lock();
        let now = Instant::now();
        data.retain(|_, e| !e.is_expired(now));
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn delete_prefix(&self, prefix: &str) -> u64 {
        let mut data = self.lock();
        let before = data.len();
        data.retain(|k, _| !k.starts_with(prefix));
        (before - data.len()) as u64
    }

    /// 原子替换二级索引：删除旧键，写入新键
    pub fn replace_index(&self, old_key: &str, new_key: &str, value: &str, ttl: Option<Duration>) {
        let mut data = self.lock();
        data.remove(old_key);
        data.insert(new_key.to_string(), Entry::new(Slot::Str(value.to_string()), ttl));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
