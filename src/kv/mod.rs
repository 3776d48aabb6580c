//! The command surface the store needs from its key/value substrate.
//!
//! The trait mirrors the Redis commands the store issues and nothing more:
//! hashes, unordered sets, sorted sets, plain strings, set-if-absent with a
//! TTL, and compare-and-delete. `RedisKv` is the production implementation;
//! `MemoryKv` backs tests and embedded use.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

#[async_trait]
pub trait Kv: Send + Sync {
    // Hashes
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    // Unordered sets
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    async fn scard(&self, key: &str) -> Result<u64>;

    // Sorted sets
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    /// Members with score <= `max`, ascending by (score, member).
    async fn zrange_by_score(&self, key: &str, max: f64) -> Result<Vec<(String, f64)>>;
    async fn zcard(&self, key: &str) -> Result<u64>;

    // Strings
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    /// SET NX PX: returns true when the key was absent and is now set.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;
    /// Delete only when the current value equals `value`; returns whether a
    /// deletion happened.
    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}
