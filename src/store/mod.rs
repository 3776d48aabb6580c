//! The storage core: CRUD, the trigger state machine, acquisition, firing,
//! completion, pause/resume and misfire handling on top of the KV.
//!
//! Nothing here takes the distributed mutex; the facade serializes every
//! call before delegating. The KV owns all state, so a `Store` is stateless
//! between calls apart from its handles and configuration.

mod acquire;
mod calendars;
mod jobs;
mod pause;
mod triggers;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::codec::CalendarCodec;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::keys::KeySchema;
use crate::kv::Kv;
use crate::model::{Calendar, JobDetail, JobKey, Trigger, TriggerKey, TriggerState};
use crate::signal::SchedulerSignaler;

/// Group that synthetic recovery triggers are stored under.
pub const RECOVERING_TRIGGERS_GROUP: &str = "RECOVERING_JOBS";

#[derive(Clone)]
pub struct Store {
    kv: Arc<dyn Kv>,
    schema: KeySchema,
    codec: Arc<dyn CalendarCodec>,
    signaler: Arc<dyn SchedulerSignaler>,
    instance_id: String,
    misfire_threshold_ms: u64,
    trigger_lock_timeout_ms: u64,
}

impl Store {
    pub fn new(
        kv: Arc<dyn Kv>,
        codec: Arc<dyn CalendarCodec>,
        signaler: Arc<dyn SchedulerSignaler>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            kv,
            schema: KeySchema::new(&config.key_prefix, &config.key_delimiter),
            codec,
            signaler,
            instance_id: config.instance_id.clone(),
            misfire_threshold_ms: config.misfire_threshold_ms,
            trigger_lock_timeout_ms: config.trigger_lock_timeout_ms,
        }
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Sorted-set score for a fire time. Terminal triggers score zero.
    pub(crate) fn score(at: Option<DateTime<Utc>>) -> f64 {
        at.map(|t| t.timestamp_millis() as f64).unwrap_or(0.0)
    }

    // ── Loading ───────────────────────────────────────────────────────

    pub(crate) async fn load_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        let fields = self.kv.hgetall(&self.schema.trigger_hash(key)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Trigger::from_hash(key.clone(), &fields).map(Some)
    }

    pub(crate) async fn load_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let fields = self.kv.hgetall(&self.schema.job_hash(key)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let data = self.kv.hgetall(&self.schema.job_data_map(key)).await?;
        JobDetail::from_hash(key.clone(), &fields, data).map(Some)
    }

    pub(crate) async fn load_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        match self.kv.get(&self.schema.calendar(name)).await? {
            Some(bytes) => self.codec.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// The calendar a trigger references, if any. A dangling reference is a
    /// not-found error: store-time validation makes it unreachable short of
    /// outside interference with the KV.
    pub(crate) async fn trigger_calendar(&self, trigger: &Trigger) -> Result<Option<Calendar>> {
        match &trigger.calendar_name {
            Some(name) => match self.load_calendar(name).await? {
                Some(cal) => Ok(Some(cal)),
                None => Err(StoreError::ObjectNotFound(format!(
                    "calendar {name} referenced by trigger {}",
                    trigger.key
                ))),
            },
            None => Ok(None),
        }
    }

    // ── State machine primitives ──────────────────────────────────────

    /// Current state of a trigger, or None when it is in no state index.
    pub async fn trigger_state(&self, key: &TriggerKey) -> Result<Option<TriggerState>> {
        let member = self.schema.encode_trigger_key(key);
        Ok(self.find_trigger_state(&member).await?.map(|(state, _)| state))
    }

    pub(crate) async fn find_trigger_state(
        &self,
        member: &str,
    ) -> Result<Option<(TriggerState, f64)>> {
        for state in TriggerState::ALL {
            if let Some(score) = self
                .kv
                .zscore(&self.schema.trigger_state(state), member)
                .await?
            {
                return Ok(Some((state, score)));
            }
        }
        Ok(None)
    }

    /// Place a trigger in `state`, removing it from every other state index
    /// so it is a member of exactly one at all times.
    pub(crate) async fn set_trigger_state(
        &self,
        key: &TriggerKey,
        state: TriggerState,
        score: f64,
    ) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        for other in TriggerState::ALL {
            if other != state {
                self.kv
                    .zrem(&self.schema.trigger_state(other), &member)
                    .await?;
            }
        }
        self.kv
            .zadd(&self.schema.trigger_state(state), &member, score)
            .await?;
        Ok(())
    }

    pub(crate) async fn clear_trigger_state(&self, key: &TriggerKey) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        for state in TriggerState::ALL {
            self.kv
                .zrem(&self.schema.trigger_state(state), &member)
                .await?;
        }
        Ok(())
    }

    // ── Group pause flags ─────────────────────────────────────────────

    pub async fn is_trigger_group_paused(&self, group: &str) -> Result<bool> {
        self.kv
            .sismember(&self.schema.paused_trigger_groups(), group)
            .await
    }

    pub async fn is_job_group_paused(&self, group: &str) -> Result<bool> {
        self.kv
            .sismember(&self.schema.paused_job_groups(), group)
            .await
    }

    // ── Misfire ───────────────────────────────────────────────────────

    /// Run the misfire handler for a trigger whose fire time has already
    /// slipped past the threshold. Persists the recomputed trigger and
    /// returns true when the misfire consumed it (no further fire; the
    /// trigger has been moved to Completed).
    pub(crate) async fn apply_misfire_overdue(
        &self,
        trigger: &mut Trigger,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.signaler.notify_trigger_misfired(&trigger.key);
        let calendar = self.trigger_calendar(trigger).await?;
        trigger.apply_misfire(calendar.as_ref(), now);
        self.kv
            .hset_all(
                &self.schema.trigger_hash(&trigger.key),
                &trigger.to_hash(),
            )
            .await?;
        if trigger.next_fire_time.is_none() {
            self.set_trigger_state(&trigger.key, TriggerState::Completed, Self::score(None))
                .await?;
            self.signaler.notify_trigger_finalized(&trigger.key);
            return Ok(true);
        }
        Ok(false)
    }

    // ── Key validation ────────────────────────────────────────────────

    pub(crate) fn validate_job_key(&self, key: &JobKey) -> Result<()> {
        if !self.schema.name_is_valid(&key.name) || !self.schema.name_is_valid(&key.group) {
            return Err(StoreError::ConstraintViolation(format!(
                "job key {key} is empty or contains the key delimiter {:?}",
                self.schema.delimiter()
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_trigger_key(&self, key: &TriggerKey) -> Result<()> {
        if !self.schema.name_is_valid(&key.name) || !self.schema.name_is_valid(&key.group) {
            return Err(StoreError::ConstraintViolation(format!(
                "trigger key {key} is empty or contains the key delimiter {:?}",
                self.schema.delimiter()
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_group_name(&self, group: &str) -> Result<()> {
        if !self.schema.name_is_valid(group) {
            return Err(StoreError::ConstraintViolation(format!(
                "group name {group:?} is empty or contains the key delimiter {:?}",
                self.schema.delimiter()
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_calendar_name(&self, name: &str) -> Result<()> {
        if !self.schema.name_is_valid(name) {
            return Err(StoreError::ConstraintViolation(format!(
                "calendar name {name:?} is empty or contains the key delimiter {:?}",
                self.schema.delimiter()
            )));
        }
        Ok(())
    }

    // ── Wipe ──────────────────────────────────────────────────────────

    /// Delete every piece of scheduling state under this schema's prefix.
    /// Driven off the index sets so no keyspace scan is needed.
    pub async fn clear_all(&self) -> Result<()> {
        // Fired records first, collecting instance index keys as we go.
        let fired_key = self.schema.fired_triggers();
        let mut instances = vec![self.instance_id.clone()];
        for (_, payload) in self.kv.hgetall(&fired_key).await? {
            if let Ok(record) = serde_json::from_str::<crate::model::FiredTrigger>(&payload) {
                if !instances.contains(&record.instance_id) {
                    instances.push(record.instance_id);
                }
            }
        }
        self.kv.del(&fired_key).await?;
        for instance in instances {
            self.kv.del(&self.schema.instance_fired(&instance)).await?;
        }

        for member in self.kv.smembers(&self.schema.triggers()).await? {
            if let Ok(key) = self.schema.decode_trigger_key(&member) {
                self.kv.del(&self.schema.trigger_hash(&key)).await?;
            }
        }
        self.kv.del(&self.schema.triggers()).await?;
        for group in self.kv.smembers(&self.schema.trigger_groups()).await? {
            self.kv.del(&self.schema.trigger_group(&group)).await?;
        }
        self.kv.del(&self.schema.trigger_groups()).await?;
        self.kv.del(&self.schema.paused_trigger_groups()).await?;
        for state in TriggerState::ALL {
            self.kv.del(&self.schema.trigger_state(state)).await?;
        }

        for member in self.kv.smembers(&self.schema.jobs()).await? {
            if let Ok(key) = self.schema.decode_job_key(&member) {
                self.kv.del(&self.schema.job_hash(&key)).await?;
                self.kv.del(&self.schema.job_data_map(&key)).await?;
                self.kv.del(&self.schema.job_triggers(&key)).await?;
            }
        }
        self.kv.del(&self.schema.jobs()).await?;
        for group in self.kv.smembers(&self.schema.job_groups()).await? {
            self.kv.del(&self.schema.job_group(&group)).await?;
        }
        self.kv.del(&self.schema.job_groups()).await?;
        self.kv.del(&self.schema.paused_job_groups()).await?;
        self.kv.del(&self.schema.blocked_jobs()).await?;

        for name in self.kv.smembers(&self.schema.calendars()).await? {
            self.kv.del(&self.schema.calendar(&name)).await?;
            self.kv.del(&self.schema.calendar_triggers(&name)).await?;
        }
        self.kv.del(&self.schema.calendars()).await?;

        tracing::info!("cleared all scheduling data");
        Ok(())
    }
}
