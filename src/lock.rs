use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::KeySchema;
use crate::kv::Kv;

/// Coarse distributed mutex on a single KV key.
///
/// Acquisition is `SET NX PX` with a token unique to this holder; a miss
/// sleeps a short jittered interval and retries until cancelled. There is no
/// fair queueing. The lock is not reentrant: callers acquire exactly once
/// per store operation. A lock that outlives its TTL is forfeit; releasing
/// it afterwards only logs.
pub struct DistributedLock {
    kv: Arc<dyn Kv>,
    key: String,
    instance_id: String,
    seq: AtomicU64,
    ttl_ms: u64,
    backoff_min_ms: u64,
    backoff_max_ms: u64,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn Kv>, schema: &KeySchema, config: &StoreConfig) -> Self {
        Self {
            kv,
            key: schema.lock(),
            instance_id: config.instance_id.clone(),
            seq: AtomicU64::new(0),
            ttl_ms: config.lock_timeout_ms,
            backoff_min_ms: config.lock_backoff_min_ms,
            backoff_max_ms: config.lock_backoff_max_ms.max(config.lock_backoff_min_ms),
        }
    }

    /// Spin until the lock is held or `cancel` fires. Returns the token that
    /// must be passed back to [`release`](Self::release).
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<String> {
        let token = format!(
            "{}:{}",
            self.instance_id,
            self.seq.fetch_add(1, Ordering::Relaxed)
        );
        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if self.kv.set_nx_px(&self.key, &token, self.ttl_ms).await? {
                return Ok(token);
            }
            let backoff = rand::thread_rng().gen_range(self.backoff_min_ms..=self.backoff_max_ms);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
            }
        }
    }

    /// Release the lock if we still own it. A mismatched token means the TTL
    /// already reclaimed the lock for someone else; that is logged, never
    /// raised.
    pub async fn release(&self, token: &str) -> Result<()> {
        if !self.kv.del_if_eq(&self.key, token).await? {
            tracing::warn!(
                instance = %self.instance_id,
                "store lock expired before release; another holder may have taken it"
            );
        }
        Ok(())
    }
}
