use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::model::{
    CompletedInstruction, FiredResult, FiredTrigger, JobDetail, MisfirePolicy, Trigger,
    TriggerKey, TriggerState,
};
use crate::store::{Store, RECOVERING_TRIGGERS_GROUP};

impl Store {
    /// Reserve up to `max_count` due triggers for this instance.
    ///
    /// Candidates are the Waiting triggers whose fire time is at or before
    /// `max(no_later_than, now + time_window)`, ordered by fire time, then
    /// priority (higher first), then key. Each candidate is misfire-checked
    /// on the way through; acquired triggers move to the Acquired index and
    /// gain a fired-trigger record owned by this instance. An orphan sweep
    /// runs first, every cycle.
    pub async fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<Trigger>> {
        let now = Utc::now();
        self.recover_orphans(now).await?;
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let ceiling = no_later_than.max(now + time_window);
        let waiting_key = self.schema.trigger_state(TriggerState::Waiting);
        let members = self
            .kv
            .zrange_by_score(&waiting_key, ceiling.timestamp_millis() as f64)
            .await?;

        let mut candidates: Vec<Trigger> = Vec::new();
        for (member, _) in members {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let trigger_key = match self.schema.decode_trigger_key(&member) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(member = %member, error = %e, "dropping malformed waiting-set member");
                    self.kv.zrem(&waiting_key, &member).await?;
                    continue;
                }
            };
            match self.load_trigger(&trigger_key).await {
                Ok(Some(trigger)) => candidates.push(trigger),
                Ok(None) => {
                    // Index entry outlived its record.
                    self.kv.zrem(&waiting_key, &member).await?;
                }
                Err(StoreError::Decode(e)) => {
                    tracing::warn!(
                        trigger = %trigger_key,
                        error = %e,
                        "undecodable trigger moved to error state"
                    );
                    self.set_trigger_state(&trigger_key, TriggerState::Error, 0.0)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }
        candidates.sort_by(Self::fire_order);

        let mut acquired = Vec::new();
        for mut trigger in candidates {
            if acquired.len() >= max_count {
                break;
            }
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let Some(job) = self.load_job(&trigger.job_key).await? else {
                tracing::warn!(
                    trigger = %trigger.key,
                    job = %trigger.job_key,
                    "trigger references a missing job; moving to error state"
                );
                self.set_trigger_state(
                    &trigger.key,
                    TriggerState::Error,
                    Self::score(trigger.next_fire_time),
                )
                .await?;
                continue;
            };
            if job.disallow_concurrent
                && self
                    .kv
                    .sismember(
                        &self.schema.blocked_jobs(),
                        &self.schema.encode_job_key(&job.key),
                    )
                    .await?
            {
                continue;
            }
            if trigger.is_misfired(now, self.misfire_threshold_ms) {
                if self.apply_misfire_overdue(&mut trigger, now).await? {
                    continue;
                }
                let member = self.schema.encode_trigger_key(&trigger.key);
                self.kv
                    .zadd(&waiting_key, &member, Self::score(trigger.next_fire_time))
                    .await?;
                if trigger.next_fire_time.map_or(true, |next| next > ceiling) {
                    continue;
                }
            }

            self.set_trigger_state(
                &trigger.key,
                TriggerState::Acquired,
                Self::score(trigger.next_fire_time),
            )
            .await?;
            self.add_fired_record(&trigger, job.requests_recovery, now)
                .await?;
            tracing::debug!(
                trigger = %trigger.key,
                next_fire = ?trigger.next_fire_time,
                "acquired trigger"
            );
            acquired.push(trigger);
        }
        // Misfire handling may have moved a fire time; order the result by
        // what the triggers now say.
        acquired.sort_by(Self::fire_order);
        Ok(acquired)
    }

    /// (fire time asc, priority desc, key asc)
    fn fire_order(a: &Trigger, b: &Trigger) -> Ordering {
        Self::score(a.next_fire_time)
            .partial_cmp(&Self::score(b.next_fire_time))
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.key.cmp(&b.key))
    }

    /// Hand back a trigger that was acquired but will not be fired.
    pub async fn release_acquired_trigger(&self, trigger: &Trigger) -> Result<()> {
        if self.trigger_state(&trigger.key).await? != Some(TriggerState::Acquired) {
            return Ok(());
        }
        let score = self
            .load_trigger(&trigger.key)
            .await?
            .map(|t| Self::score(t.next_fire_time))
            .unwrap_or(0.0);
        self.set_trigger_state(&trigger.key, TriggerState::Waiting, score)
            .await?;
        self.remove_fired_records(&trigger.key).await?;
        tracing::debug!(trigger = %trigger.key, "released acquired trigger");
        Ok(())
    }

    /// The scheduler is about to execute these acquired triggers. Each one
    /// still present and still Acquired advances past its fire time, moves
    /// to Executing, and yields a bundle of what the execution needs. A
    /// trigger that fails the checks contributes nothing.
    pub async fn triggers_fired(&self, triggers: &[Trigger]) -> Result<Vec<FiredResult>> {
        let now = Utc::now();
        let mut results = Vec::new();
        for trigger in triggers {
            if self.trigger_state(&trigger.key).await? != Some(TriggerState::Acquired) {
                continue;
            }
            let Some(mut stored) = self.load_trigger(&trigger.key).await? else {
                continue;
            };
            let calendar = match &stored.calendar_name {
                Some(name) => match self.load_calendar(name).await? {
                    Some(cal) => Some(cal),
                    None => {
                        tracing::warn!(
                            trigger = %stored.key,
                            calendar = %name,
                            "fired trigger's calendar is gone; skipping"
                        );
                        continue;
                    }
                },
                None => None,
            };
            let Some(job) = self.load_job(&stored.job_key).await? else {
                continue;
            };

            let fire_time = stored.next_fire_time.unwrap_or(now);
            stored.triggered(calendar.as_ref());
            self.kv
                .hset_all(&self.schema.trigger_hash(&stored.key), &stored.to_hash())
                .await?;

            if job.disallow_concurrent {
                self.kv
                    .sadd(
                        &self.schema.blocked_jobs(),
                        &self.schema.encode_job_key(&job.key),
                    )
                    .await?;
                self.block_siblings(&stored.key, &job.key).await?;
            }

            self.set_trigger_state(
                &stored.key,
                TriggerState::Executing,
                Self::score(stored.next_fire_time.or(Some(fire_time))),
            )
            .await?;
            self.mark_fired_executing(&stored.key, now).await?;
            tracing::debug!(trigger = %stored.key, job = %job.key, "trigger fired");

            results.push(FiredResult {
                trigger: stored,
                job,
                calendar,
                fire_time,
            });
        }
        Ok(results)
    }

    /// The scheduler finished executing `trigger`'s job. Applies the
    /// completion instruction, releases any concurrency block the job held,
    /// and persists the job data map when the job asks for it.
    pub async fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedInstruction,
    ) -> Result<()> {
        let now = Utc::now();
        self.remove_fired_records(&trigger.key).await?;

        let stored = match self.load_trigger(&trigger.key).await {
            Ok(t) => t,
            Err(StoreError::Decode(_)) => None,
            Err(e) => return Err(e),
        };
        match instruction {
            CompletedInstruction::NoInstruction => {
                if let Some(stored) = &stored {
                    match stored.next_fire_time {
                        Some(next) => {
                            self.set_trigger_state(
                                &trigger.key,
                                TriggerState::Waiting,
                                Self::score(Some(next)),
                            )
                            .await?;
                        }
                        None => {
                            self.set_trigger_state(
                                &trigger.key,
                                TriggerState::Completed,
                                Self::score(None),
                            )
                            .await?;
                            self.signaler.notify_trigger_finalized(&trigger.key);
                        }
                    }
                }
            }
            CompletedInstruction::DeleteTrigger => {
                self.remove_trigger_core(&trigger.key, true).await?;
                self.signaler.notify_trigger_finalized(&trigger.key);
                self.signaler.signal_scheduling_change(None);
            }
            CompletedInstruction::SetTriggerComplete => {
                if stored.is_some() {
                    self.set_trigger_state(&trigger.key, TriggerState::Completed, Self::score(None))
                        .await?;
                    self.signaler.signal_scheduling_change(None);
                }
            }
            CompletedInstruction::SetTriggerError => {
                if let Some(stored) = &stored {
                    tracing::warn!(trigger = %trigger.key, "trigger set to error state by job");
                    self.set_trigger_state(
                        &trigger.key,
                        TriggerState::Error,
                        Self::score(stored.next_fire_time),
                    )
                    .await?;
                    self.signaler.signal_scheduling_change(None);
                }
            }
            CompletedInstruction::SetAllJobTriggersComplete => {
                self.set_all_job_triggers(&job.key, TriggerState::Completed)
                    .await?;
                self.signaler.signal_scheduling_change(None);
            }
            CompletedInstruction::SetAllJobTriggersError => {
                tracing::warn!(job = %job.key, "all job triggers set to error state by job");
                self.set_all_job_triggers(&job.key, TriggerState::Error)
                    .await?;
                self.signaler.signal_scheduling_change(None);
            }
        }

        if job.disallow_concurrent {
            self.kv
                .srem(
                    &self.schema.blocked_jobs(),
                    &self.schema.encode_job_key(&job.key),
                )
                .await?;
            self.unblock_siblings(&job.key, now).await?;
            self.signaler.signal_scheduling_change(None);
        }
        if job.persist_data_after_execution
            && self.kv.exists(&self.schema.job_hash(&job.key)).await?
        {
            let data_key = self.schema.job_data_map(&job.key);
            self.kv.del(&data_key).await?;
            if !job.data.is_empty() {
                let entries: Vec<(String, String)> = job
                    .data
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.kv.hset_all(&data_key, &entries).await?;
            }
        }
        Ok(())
    }

    /// Return triggers abandoned by dead scheduler instances to rotation.
    ///
    /// Best-effort: runs under the global mutex, and the acquisition path is
    /// the only producer of fired records, so a record older than the
    /// trigger lock timeout can only belong to a holder that stopped making
    /// progress.
    pub(crate) async fn recover_orphans(&self, now: DateTime<Utc>) -> Result<()> {
        let fired_key = self.schema.fired_triggers();
        let horizon = Duration::milliseconds(self.trigger_lock_timeout_ms as i64);
        for (id, payload) in self.kv.hgetall(&fired_key).await? {
            let record: FiredTrigger = match serde_json::from_str(&payload) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "dropping undecodable fired-trigger record");
                    self.kv.hdel(&fired_key, &id).await?;
                    continue;
                }
            };
            if record.acquired_at + horizon >= now {
                continue;
            }
            tracing::warn!(
                trigger = %record.trigger_key,
                instance = %record.instance_id,
                acquired_at = %record.acquired_at,
                "recovering trigger orphaned by a dead scheduler instance"
            );
            self.kv.hdel(&fired_key, &id).await?;
            self.kv
                .srem(&self.schema.instance_fired(&record.instance_id), &id)
                .await?;
            // The holder died mid-flight; release any concurrency block.
            self.kv
                .srem(
                    &self.schema.blocked_jobs(),
                    &self.schema.encode_job_key(&record.job_key),
                )
                .await?;

            let trigger = match self.load_trigger(&record.trigger_key).await {
                Ok(t) => t,
                Err(StoreError::Decode(_)) => None,
                Err(e) => return Err(e),
            };
            if let Some(trigger) = trigger {
                let paused = self.is_trigger_group_paused(&trigger.key.group).await?
                    || self.is_job_group_paused(&trigger.job_key.group).await?;
                let state = if paused {
                    TriggerState::Paused
                } else {
                    TriggerState::Waiting
                };
                self.set_trigger_state(&trigger.key, state, Self::score(trigger.next_fire_time))
                    .await?;
            }
            if record.requests_recovery {
                self.enqueue_recovery_trigger(&record, now).await?;
            }
            self.signaler.signal_scheduling_change(None);
        }
        Ok(())
    }

    /// One-shot trigger that re-fires a requests-recovery job immediately.
    async fn enqueue_recovery_trigger(&self, record: &FiredTrigger, now: DateTime<Utc>) -> Result<()> {
        if self.load_job(&record.job_key).await?.is_none() {
            return Ok(());
        }
        let instance = record.instance_id.replace(self.schema.delimiter(), "-");
        let key = TriggerKey::new(
            format!("recover-{}-{}", instance, Uuid::new_v4()),
            RECOVERING_TRIGGERS_GROUP,
        );
        let trigger = Trigger::one_shot(key, record.job_key.clone(), now)
            .with_description(format!("recovery of {}", record.trigger_key))
            .with_misfire_policy(MisfirePolicy::Ignore);
        self.store_trigger(&trigger, false).await?;
        tracing::info!(
            job = %record.job_key,
            trigger = %trigger.key,
            "enqueued recovery trigger"
        );
        Ok(())
    }

    async fn block_siblings(&self, fired: &TriggerKey, job_key: &crate::model::JobKey) -> Result<()> {
        for member in self.kv.smembers(&self.schema.job_triggers(job_key)).await? {
            let sibling = self.schema.decode_trigger_key(&member)?;
            if sibling == *fired {
                continue;
            }
            match self.find_trigger_state(&member).await? {
                Some((TriggerState::Waiting, score)) => {
                    self.set_trigger_state(&sibling, TriggerState::Blocked, score)
                        .await?;
                }
                Some((TriggerState::Paused, score)) => {
                    self.set_trigger_state(&sibling, TriggerState::PausedBlocked, score)
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn unblock_siblings(
        &self,
        job_key: &crate::model::JobKey,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for member in self.kv.smembers(&self.schema.job_triggers(job_key)).await? {
            let sibling = self.schema.decode_trigger_key(&member)?;
            match self.find_trigger_state(&member).await? {
                Some((TriggerState::Blocked, _)) => {
                    let Some(mut trigger) = self.load_trigger(&sibling).await? else {
                        continue;
                    };
                    if trigger.is_misfired(now, self.misfire_threshold_ms)
                        && self.apply_misfire_overdue(&mut trigger, now).await?
                    {
                        continue;
                    }
                    self.set_trigger_state(
                        &sibling,
                        TriggerState::Waiting,
                        Self::score(trigger.next_fire_time),
                    )
                    .await?;
                }
                Some((TriggerState::PausedBlocked, score)) => {
                    self.set_trigger_state(&sibling, TriggerState::Paused, score)
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ── Fired-trigger records ─────────────────────────────────────────

    pub(crate) async fn add_fired_record(
        &self,
        trigger: &Trigger,
        requests_recovery: bool,
        acquired_at: DateTime<Utc>,
    ) -> Result<()> {
        let encoded = self.schema.encode_trigger_key(&trigger.key);
        let record = FiredTrigger::new(
            &encoded,
            trigger,
            &self.instance_id,
            requests_recovery,
            acquired_at,
        );
        let payload = serde_json::to_string(&record)
            .map_err(|e| StoreError::Decode(format!("fired record encode failed: {e}")))?;
        self.kv
            .hset(&self.schema.fired_triggers(), &record.id, &payload)
            .await?;
        self.kv
            .sadd(&self.schema.instance_fired(&self.instance_id), &record.id)
            .await?;
        Ok(())
    }

    pub(crate) async fn remove_fired_records(&self, key: &TriggerKey) -> Result<()> {
        let fired_key = self.schema.fired_triggers();
        for (id, payload) in self.kv.hgetall(&fired_key).await? {
            let Ok(record) = serde_json::from_str::<FiredTrigger>(&payload) else {
                continue;
            };
            if record.trigger_key == *key {
                self.kv.hdel(&fired_key, &id).await?;
                self.kv
                    .srem(&self.schema.instance_fired(&record.instance_id), &id)
                    .await?;
            }
        }
        Ok(())
    }

    async fn mark_fired_executing(&self, key: &TriggerKey, fired_at: DateTime<Utc>) -> Result<()> {
        let fired_key = self.schema.fired_triggers();
        for (id, payload) in self.kv.hgetall(&fired_key).await? {
            let Ok(mut record) = serde_json::from_str::<FiredTrigger>(&payload) else {
                continue;
            };
            if record.trigger_key == *key && record.instance_id == self.instance_id {
                record.executing = true;
                record.fired_at = Some(fired_at);
                let payload = serde_json::to_string(&record)
                    .map_err(|e| StoreError::Decode(format!("fired record encode failed: {e}")))?;
                self.kv.hset(&fired_key, &id, &payload).await?;
            }
        }
        Ok(())
    }

    /// Drop every fired record owned by this instance. Called on shutdown.
    pub async fn clear_instance_fired_records(&self) -> Result<()> {
        let instance_key = self.schema.instance_fired(&self.instance_id);
        for id in self.kv.smembers(&instance_key).await? {
            self.kv.hdel(&self.schema.fired_triggers(), &id).await?;
        }
        self.kv.del(&instance_key).await?;
        Ok(())
    }

    /// Set every trigger of a job to `state`, keeping each one's fire-time
    /// score where it has one.
    async fn set_all_job_triggers(
        &self,
        job_key: &crate::model::JobKey,
        state: TriggerState,
    ) -> Result<()> {
        for member in self.kv.smembers(&self.schema.job_triggers(job_key)).await? {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            let score = match state {
                TriggerState::Completed => Self::score(None),
                _ => match self.load_trigger(&trigger_key).await {
                    Ok(Some(t)) => Self::score(t.next_fire_time),
                    _ => 0.0,
                },
            };
            self.set_trigger_state(&trigger_key, state, score).await?;
        }
        Ok(())
    }
}
