//! Shared fixtures for the integration suite: a store over an in-memory KV
//! plus builders for jobs and triggers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, DurationRound, Utc};
use cronstore::kv::MemoryKv;
use cronstore::{
    JobDetail, JobKey, RedisJobStore, SchedulerSignaler, StoreConfig, Trigger, TriggerKey,
};

/// Store wired to a fresh in-memory KV, fast lock backoff, 1s misfire
/// threshold.
pub fn test_store(instance_id: &str) -> (RedisJobStore, MemoryKv) {
    let kv = MemoryKv::new();
    let store = test_store_sharing(instance_id, &kv);
    (store, kv)
}

/// A second instance over the same KV: same prefix, same cluster.
pub fn test_store_sharing(instance_id: &str, kv: &MemoryKv) -> RedisJobStore {
    let config = StoreConfig {
        misfire_threshold_ms: 1_000,
        lock_backoff_min_ms: 1,
        lock_backoff_max_ms: 3,
        ..StoreConfig::new(instance_id)
    };
    let mut store = RedisJobStore::new(Arc::new(kv.clone()), config);
    store.initialize(Arc::new(RecordingSignaler::default()), instance_id);
    store
}

pub fn job(name: &str, group: &str) -> JobDetail {
    JobDetail::new(JobKey::new(name, group), "test.Job")
}

/// Simple trigger firing every ten seconds, anchored `offset_secs` from now.
/// Times are millisecond-aligned so values survive the hash encoding intact.
pub fn trigger(name: &str, group: &str, job: &JobKey, offset_secs: i64) -> Trigger {
    let start = (Utc::now() + chrono::Duration::seconds(offset_secs))
        .duration_round(chrono::Duration::milliseconds(1))
        .expect("in range");
    Trigger::simple(TriggerKey::new(name, group), job.clone(), 10_000, -1)
        .with_start_time(start)
        .with_next_fire_time(start)
}

/// Signaler that remembers what the store told it.
#[derive(Debug, Default)]
pub struct RecordingSignaler {
    pub misfired: Mutex<Vec<TriggerKey>>,
    pub finalized: Mutex<Vec<TriggerKey>>,
}

impl SchedulerSignaler for RecordingSignaler {
    fn notify_trigger_misfired(&self, key: &TriggerKey) {
        self.misfired.lock().unwrap().push(key.clone());
    }

    fn notify_trigger_finalized(&self, key: &TriggerKey) {
        self.finalized.lock().unwrap().push(key.clone());
    }

    fn signal_scheduling_change(&self, _candidate_next_fire: Option<DateTime<Utc>>) {}
}
