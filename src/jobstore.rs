//! The job-store facade consumed by the scheduler.
//!
//! Every operation takes the distributed mutex exactly once, delegates to
//! the storage core, and releases the mutex on every exit path. Errors
//! follow one policy: an already-exists collision propagates unchanged, and
//! anything else is logged here and re-raised as a persistence error
//! wrapping the cause.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::codec::{CalendarCodec, JsonCodec};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::KeySchema;
use crate::kv::{Kv, RedisKv};
use crate::lock::DistributedLock;
use crate::model::{
    Calendar, CompletedInstruction, FiredResult, GroupMatcher, JobDetail, JobKey, Trigger,
    TriggerKey, TriggerState,
};
use crate::signal::{NoopSignaler, SchedulerSignaler};
use crate::store::Store;

pub struct RedisJobStore {
    kv: Arc<dyn Kv>,
    codec: Arc<dyn CalendarCodec>,
    config: StoreConfig,
    store: Store,
    lock: DistributedLock,
}

impl RedisJobStore {
    /// Build a store over an existing KV handle with the default JSON
    /// calendar codec. Call [`initialize`](Self::initialize) before serving
    /// a scheduler.
    pub fn new(kv: Arc<dyn Kv>, config: StoreConfig) -> Self {
        Self::with_codec(kv, config, Arc::new(JsonCodec))
    }

    pub fn with_codec(
        kv: Arc<dyn Kv>,
        config: StoreConfig,
        codec: Arc<dyn CalendarCodec>,
    ) -> Self {
        let schema = KeySchema::new(&config.key_prefix, &config.key_delimiter);
        let store = Store::new(kv.clone(), codec.clone(), Arc::new(NoopSignaler), &config);
        let lock = DistributedLock::new(kv.clone(), &schema, &config);
        Self {
            kv,
            codec,
            config,
            store,
            lock,
        }
    }

    /// Connect to the KV named by the config and build a store over it.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let kv: Arc<dyn Kv> = Arc::new(RedisKv::connect(&config.redis_url).await?);
        Ok(Self::new(kv, config))
    }

    /// Wire in the scheduler's signaler and this instance's identity.
    pub fn initialize(
        &mut self,
        signaler: Arc<dyn SchedulerSignaler>,
        instance_id: impl Into<String>,
    ) {
        self.config.instance_id = instance_id.into();
        let schema = KeySchema::new(&self.config.key_prefix, &self.config.key_delimiter);
        self.store = Store::new(self.kv.clone(), self.codec.clone(), signaler, &self.config);
        self.lock = DistributedLock::new(self.kv.clone(), &schema, &self.config);
        tracing::info!(instance = %self.config.instance_id, "job store initialized");
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    pub fn scheduler_started(&self) {
        tracing::info!(instance = %self.config.instance_id, "scheduler started");
    }

    pub fn scheduler_paused(&self) {
        tracing::info!(instance = %self.config.instance_id, "scheduler paused");
    }

    pub fn scheduler_resumed(&self) {
        tracing::info!(instance = %self.config.instance_id, "scheduler resumed");
    }

    /// Drop this instance's fired-trigger records so peers need not wait out
    /// the orphan timeout for work we know we are abandoning.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        let result = self
            .locked("shutdown", cancel, |store| async move {
                store.clear_instance_fired_records().await
            })
            .await;
        tracing::info!(instance = %self.config.instance_id, "job store shut down");
        result
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub async fn store_job(
        &self,
        job: &JobDetail,
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("store_job", cancel, |store| async move {
            store.store_job(job, replace).await
        })
        .await
    }

    pub async fn store_job_and_trigger(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("store_job_and_trigger", cancel, |store| async move {
            store.store_job(job, false).await?;
            store.store_trigger(trigger, false).await
        })
        .await
    }

    pub async fn store_jobs_and_triggers(
        &self,
        batch: &[(JobDetail, Vec<Trigger>)],
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("store_jobs_and_triggers", cancel, |store| async move {
            store.store_jobs_and_triggers(batch, replace).await
        })
        .await
    }

    pub async fn remove_job(&self, key: &JobKey, cancel: &CancellationToken) -> Result<bool> {
        self.locked("remove_job", cancel, |store| async move {
            store.remove_job(key).await
        })
        .await
    }

    pub async fn remove_jobs(&self, keys: &[JobKey], cancel: &CancellationToken) -> Result<bool> {
        self.locked("remove_jobs", cancel, |store| async move {
            store.remove_jobs(keys).await
        })
        .await
    }

    pub async fn retrieve_job(
        &self,
        key: &JobKey,
        cancel: &CancellationToken,
    ) -> Result<Option<JobDetail>> {
        self.locked("retrieve_job", cancel, |store| async move {
            store.retrieve_job(key).await
        })
        .await
    }

    pub async fn job_exists(&self, key: &JobKey, cancel: &CancellationToken) -> Result<bool> {
        self.locked("job_exists", cancel, |store| async move {
            store.job_exists(key).await
        })
        .await
    }

    pub async fn number_of_jobs(&self, cancel: &CancellationToken) -> Result<u64> {
        self.locked("number_of_jobs", cancel, |store| async move {
            store.number_of_jobs().await
        })
        .await
    }

    pub async fn job_keys(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobKey>> {
        self.locked("job_keys", cancel, |store| async move {
            store.job_keys(matcher).await
        })
        .await
    }

    pub async fn job_group_names(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.locked("job_group_names", cancel, |store| async move {
            store.job_group_names().await
        })
        .await
    }

    // ── Triggers ──────────────────────────────────────────────────────

    pub async fn store_trigger(
        &self,
        trigger: &Trigger,
        replace: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("store_trigger", cancel, |store| async move {
            store.store_trigger(trigger, replace).await
        })
        .await
    }

    pub async fn remove_trigger(
        &self,
        key: &TriggerKey,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("remove_trigger", cancel, |store| async move {
            store.remove_trigger(key).await
        })
        .await
    }

    pub async fn remove_triggers(
        &self,
        keys: &[TriggerKey],
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("remove_triggers", cancel, |store| async move {
            store.remove_triggers(keys).await
        })
        .await
    }

    pub async fn replace_trigger(
        &self,
        key: &TriggerKey,
        new_trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("replace_trigger", cancel, |store| async move {
            store.replace_trigger(key, new_trigger).await
        })
        .await
    }

    pub async fn retrieve_trigger(
        &self,
        key: &TriggerKey,
        cancel: &CancellationToken,
    ) -> Result<Option<Trigger>> {
        self.locked("retrieve_trigger", cancel, |store| async move {
            store.retrieve_trigger(key).await
        })
        .await
    }

    pub async fn trigger_exists(
        &self,
        key: &TriggerKey,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("trigger_exists", cancel, |store| async move {
            store.trigger_exists(key).await
        })
        .await
    }

    pub async fn number_of_triggers(&self, cancel: &CancellationToken) -> Result<u64> {
        self.locked("number_of_triggers", cancel, |store| async move {
            store.number_of_triggers().await
        })
        .await
    }

    pub async fn trigger_keys(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<TriggerKey>> {
        self.locked("trigger_keys", cancel, |store| async move {
            store.trigger_keys(matcher).await
        })
        .await
    }

    pub async fn trigger_group_names(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.locked("trigger_group_names", cancel, |store| async move {
            store.trigger_group_names().await
        })
        .await
    }

    pub async fn triggers_for_job(
        &self,
        key: &JobKey,
        cancel: &CancellationToken,
    ) -> Result<Vec<Trigger>> {
        self.locked("triggers_for_job", cancel, |store| async move {
            store.triggers_for_job(key).await
        })
        .await
    }

    pub async fn trigger_state(
        &self,
        key: &TriggerKey,
        cancel: &CancellationToken,
    ) -> Result<Option<TriggerState>> {
        self.locked("trigger_state", cancel, |store| async move {
            store.trigger_state(key).await
        })
        .await
    }

    pub async fn reset_trigger_from_error_state(
        &self,
        key: &TriggerKey,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("reset_trigger_from_error_state", cancel, |store| async move {
            store.reset_trigger_from_error_state(key).await
        })
        .await
    }

    // ── Calendars ─────────────────────────────────────────────────────

    pub async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace: bool,
        update_triggers: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("store_calendar", cancel, |store| async move {
            store
                .store_calendar(name, calendar, replace, update_triggers)
                .await
        })
        .await
    }

    pub async fn remove_calendar(&self, name: &str, cancel: &CancellationToken) -> Result<bool> {
        self.locked("remove_calendar", cancel, |store| async move {
            store.remove_calendar(name).await
        })
        .await
    }

    pub async fn retrieve_calendar(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Calendar>> {
        self.locked("retrieve_calendar", cancel, |store| async move {
            store.retrieve_calendar(name).await
        })
        .await
    }

    pub async fn calendar_exists(&self, name: &str, cancel: &CancellationToken) -> Result<bool> {
        self.locked("calendar_exists", cancel, |store| async move {
            store.calendar_exists(name).await
        })
        .await
    }

    pub async fn number_of_calendars(&self, cancel: &CancellationToken) -> Result<u64> {
        self.locked("number_of_calendars", cancel, |store| async move {
            store.number_of_calendars().await
        })
        .await
    }

    pub async fn calendar_names(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.locked("calendar_names", cancel, |store| async move {
            store.calendar_names().await
        })
        .await
    }

    // ── Pause / resume ────────────────────────────────────────────────

    pub async fn pause_trigger(&self, key: &TriggerKey, cancel: &CancellationToken) -> Result<()> {
        self.locked("pause_trigger", cancel, |store| async move {
            store.pause_trigger(key).await
        })
        .await
    }

    pub async fn pause_triggers(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.locked("pause_triggers", cancel, |store| async move {
            store.pause_triggers(matcher).await
        })
        .await
    }

    pub async fn resume_trigger(&self, key: &TriggerKey, cancel: &CancellationToken) -> Result<()> {
        self.locked("resume_trigger", cancel, |store| async move {
            store.resume_trigger(key).await
        })
        .await
    }

    pub async fn resume_triggers(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.locked("resume_triggers", cancel, |store| async move {
            store.resume_triggers(matcher).await
        })
        .await
    }

    pub async fn pause_job(&self, key: &JobKey, cancel: &CancellationToken) -> Result<()> {
        self.locked("pause_job", cancel, |store| async move {
            store.pause_job(key).await
        })
        .await
    }

    pub async fn pause_jobs(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.locked("pause_jobs", cancel, |store| async move {
            store.pause_jobs(matcher).await
        })
        .await
    }

    pub async fn resume_job(&self, key: &JobKey, cancel: &CancellationToken) -> Result<()> {
        self.locked("resume_job", cancel, |store| async move {
            store.resume_job(key).await
        })
        .await
    }

    pub async fn resume_jobs(
        &self,
        matcher: &GroupMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.locked("resume_jobs", cancel, |store| async move {
            store.resume_jobs(matcher).await
        })
        .await
    }

    pub async fn pause_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.locked("pause_all", cancel, |store| async move {
            store.pause_all().await
        })
        .await
    }

    pub async fn resume_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.locked("resume_all", cancel, |store| async move {
            store.resume_all().await
        })
        .await
    }

    pub async fn paused_trigger_groups(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.locked("paused_trigger_groups", cancel, |store| async move {
            store.paused_trigger_groups().await
        })
        .await
    }

    pub async fn is_trigger_group_paused(
        &self,
        group: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("is_trigger_group_paused", cancel, |store| async move {
            store.is_trigger_group_paused(group).await
        })
        .await
    }

    pub async fn is_job_group_paused(
        &self,
        group: &str,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.locked("is_job_group_paused", cancel, |store| async move {
            store.is_job_group_paused(group).await
        })
        .await
    }

    // ── Acquisition and execution ─────────────────────────────────────

    pub async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: StdDuration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Trigger>> {
        let window = Duration::milliseconds(time_window.as_millis().min(i64::MAX as u128) as i64);
        self.locked("acquire_next_triggers", cancel, |store| async move {
            store
                .acquire_next_triggers(no_later_than, max_count, window, cancel)
                .await
        })
        .await
    }

    pub async fn release_acquired_trigger(
        &self,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("release_acquired_trigger", cancel, |store| async move {
            store.release_acquired_trigger(trigger).await
        })
        .await
    }

    pub async fn triggers_fired(
        &self,
        triggers: &[Trigger],
        cancel: &CancellationToken,
    ) -> Result<Vec<FiredResult>> {
        self.locked("triggers_fired", cancel, |store| async move {
            store.triggers_fired(triggers).await
        })
        .await
    }

    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedInstruction,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.locked("triggered_job_complete", cancel, |store| async move {
            store.triggered_job_complete(trigger, job, instruction).await
        })
        .await
    }

    // ── Wipe ──────────────────────────────────────────────────────────

    pub async fn clear_all_scheduling_data(&self, cancel: &CancellationToken) -> Result<()> {
        self.locked("clear_all_scheduling_data", cancel, |store| async move {
            store.clear_all().await
        })
        .await
    }

    // ── Plumbing ──────────────────────────────────────────────────────

    /// Run one storage operation inside the distributed mutex, releasing it
    /// on every exit path, and apply the error policy: already-exists
    /// propagates as-is, everything else is wrapped as a persistence error.
    async fn locked<T, F, Fut>(
        &self,
        op: &'static str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Store) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.lock.acquire(cancel).await?;
        let result = f(self.store.clone()).await;
        if let Err(release_err) = self.lock.release(&token).await {
            tracing::warn!(op, error = %release_err, "failed to release store lock");
        }
        match result {
            Ok(value) => Ok(value),
            Err(err @ (StoreError::ObjectAlreadyExists(_) | StoreError::Cancelled)) => Err(err),
            Err(err) => {
                tracing::error!(op, error = %err, "store operation failed");
                Err(StoreError::Persistence {
                    op,
                    source: Box::new(err),
                })
            }
        }
    }
}
