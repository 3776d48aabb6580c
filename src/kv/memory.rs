use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::kv::Kv;

/// In-process KV with the same semantics the store relies on from Redis:
/// typed keys, TTL on `SET NX PX` values, empty collections vanish, and
/// sorted-set range scans order by (score, member).
///
/// Cloning shares the underlying map, so several store instances pointed at
/// one `MemoryKv` see a single cluster, which is exactly what the
/// multi-instance tests need.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
}

#[derive(Debug, Clone)]
enum Entry {
    Str {
        value: Vec<u8>,
        expires_at: Option<Instant>,
    },
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

impl Entry {
    fn is_expired(&self) -> bool {
        match self {
            Entry::Str {
                expires_at: Some(at),
                ..
            } => *at <= Instant::now(),
            _ => false,
        }
    }
}

fn wrong_type() -> StoreError {
    StoreError::Transport(redis::RedisError::from((
        redis::ErrorKind::TypeError,
        "WRONGTYPE operation against a key holding the wrong kind of value",
    )))
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut map = self.inner.lock().expect("kv map lock poisoned");
        map.retain(|_, entry| !entry.is_expired());
        f(&mut map)
    }

    fn with_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> Result<T> {
        self.with_map(|map| {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| Entry::Hash(HashMap::new()));
            let out = match entry {
                Entry::Hash(hash) => f(hash),
                _ => return Err(wrong_type()),
            };
            if matches!(map.get(key), Some(Entry::Hash(h)) if h.is_empty()) {
                map.remove(key);
            }
            Ok(out)
        })
    }

    fn with_set<T>(&self, key: &str, f: impl FnOnce(&mut HashSet<String>) -> T) -> Result<T> {
        self.with_map(|map| {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| Entry::Set(HashSet::new()));
            let out = match entry {
                Entry::Set(set) => f(set),
                _ => return Err(wrong_type()),
            };
            if matches!(map.get(key), Some(Entry::Set(s)) if s.is_empty()) {
                map.remove(key);
            }
            Ok(out)
        })
    }

    fn with_zset<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, f64>) -> T) -> Result<T> {
        self.with_map(|map| {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| Entry::ZSet(HashMap::new()));
            let out = match entry {
                Entry::ZSet(zset) => f(zset),
                _ => return Err(wrong_type()),
            };
            if matches!(map.get(key), Some(Entry::ZSet(z)) if z.is_empty()) {
                map.remove(key);
            }
            Ok(out)
        })
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.with_hash(key, |hash| {
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_hash(key, |hash| {
            hash.insert(field.to_string(), value.to_string());
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_hash(key, |hash| hash.clone())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        self.with_hash(key, |hash| {
            hash.remove(field);
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.with_set(key, |set| {
            set.insert(member.to_string());
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.with_set(key, |set| {
            set.remove(member);
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.with_set(key, |set| set.iter().cloned().collect())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with_set(key, |set| set.contains(member))
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.with_set(key, |set| set.len() as u64)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.with_zset(key, |zset| {
            zset.insert(member.to_string(), score);
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.with_zset(key, |zset| {
            zset.remove(member);
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        self.with_zset(key, |zset| zset.get(member).copied())
    }

    async fn zrange_by_score(&self, key: &str, max: f64) -> Result<Vec<(String, f64)>> {
        self.with_zset(key, |zset| {
            let mut members: Vec<(String, f64)> = zset
                .iter()
                .filter(|(_, score)| **score <= max)
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            members.sort_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            members
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.with_zset(key, |zset| zset.len() as u64)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.with_map(|map| match map.get(key) {
            Some(Entry::Str { value, .. }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type()),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.with_map(|map| {
            map.insert(
                key.to_string(),
                Entry::Str {
                    value: value.to_vec(),
                    expires_at: None,
                },
            );
        });
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        self.with_map(|map| {
            if map.contains_key(key) {
                return Ok(false);
            }
            map.insert(
                key.to_string(),
                Entry::Str {
                    value: value.as_bytes().to_vec(),
                    expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
                },
            );
            Ok(true)
        })
    }

    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool> {
        self.with_map(|map| {
            let held = matches!(
                map.get(key),
                Some(Entry::Str { value: stored, .. }) if stored.as_slice() == value.as_bytes()
            );
            if held {
                map.remove(key);
            }
            Ok(held)
        })
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_map(|map| {
            map.remove(key);
        });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.with_map(|map| map.contains_key(key)))
    }
}
