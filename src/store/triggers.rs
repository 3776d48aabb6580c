use crate::error::{Result, StoreError};
use crate::model::{GroupMatcher, Trigger, TriggerKey, TriggerState};
use crate::store::Store;

impl Store {
    pub async fn store_trigger(&self, trigger: &Trigger, replace: bool) -> Result<()> {
        self.validate_trigger_key(&trigger.key)?;
        trigger.validate()?;

        let hash_key = self.schema.trigger_hash(&trigger.key);
        let exists = self.kv.exists(&hash_key).await?;
        if exists && !replace {
            return Err(StoreError::ObjectAlreadyExists(format!(
                "trigger {}",
                trigger.key
            )));
        }

        let job = self.load_job(&trigger.job_key).await?.ok_or_else(|| {
            StoreError::ObjectNotFound(format!(
                "job {} referenced by trigger {}",
                trigger.job_key, trigger.key
            ))
        })?;
        let calendar = match &trigger.calendar_name {
            Some(name) => Some(self.load_calendar(name).await?.ok_or_else(|| {
                StoreError::ObjectNotFound(format!(
                    "calendar {name} referenced by trigger {}",
                    trigger.key
                ))
            })?),
            None => None,
        };

        let encoded = self.schema.encode_trigger_key(&trigger.key);
        if exists {
            // A replacement may drop or change the calendar reference.
            match self.load_trigger(&trigger.key).await {
                Ok(Some(old)) => {
                    if let Some(old_cal) = old.calendar_name {
                        if trigger.calendar_name.as_deref() != Some(old_cal.as_str()) {
                            self.kv
                                .srem(&self.schema.calendar_triggers(&old_cal), &encoded)
                                .await?;
                        }
                    }
                }
                Ok(None) | Err(StoreError::Decode(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let mut trigger = trigger.clone();
        if trigger.next_fire_time.is_none() {
            trigger.compute_first_fire(calendar.as_ref());
        }

        self.kv.del(&hash_key).await?;
        self.kv.hset_all(&hash_key, &trigger.to_hash()).await?;
        self.kv.sadd(&self.schema.triggers(), &encoded).await?;
        self.kv
            .sadd(&self.schema.trigger_group(&trigger.key.group), &trigger.key.name)
            .await?;
        self.kv
            .sadd(&self.schema.trigger_groups(), &trigger.key.group)
            .await?;
        self.kv
            .sadd(&self.schema.job_triggers(&trigger.job_key), &encoded)
            .await?;
        if let Some(name) = &trigger.calendar_name {
            self.kv
                .sadd(&self.schema.calendar_triggers(name), &encoded)
                .await?;
        }

        let encoded_job = self.schema.encode_job_key(&trigger.job_key);
        let state = if trigger.next_fire_time.is_none() {
            // Born with no fire time left: terminal immediately.
            TriggerState::Completed
        } else if self.is_trigger_group_paused(&trigger.key.group).await?
            || self.is_job_group_paused(&trigger.job_key.group).await?
        {
            if self
                .kv
                .sismember(&self.schema.blocked_jobs(), &encoded_job)
                .await?
            {
                TriggerState::PausedBlocked
            } else {
                TriggerState::Paused
            }
        } else if self
            .kv
            .sismember(&self.schema.blocked_jobs(), &encoded_job)
            .await?
        {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        self.set_trigger_state(&trigger.key, state, Self::score(trigger.next_fire_time))
            .await?;
        tracing::debug!(
            trigger = %trigger.key,
            job = %job.key,
            state = %state,
            next_fire = ?trigger.next_fire_time,
            "stored trigger"
        );
        Ok(())
    }

    /// Remove a trigger, cascading to its job when the job is non-durable
    /// and this was its last trigger. Returns whether the trigger existed.
    pub async fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        self.remove_trigger_core(key, true).await
    }

    pub async fn remove_triggers(&self, keys: &[TriggerKey]) -> Result<bool> {
        let mut all = true;
        for key in keys {
            all &= self.remove_trigger(key).await?;
        }
        Ok(all)
    }

    pub(crate) async fn remove_trigger_core(
        &self,
        key: &TriggerKey,
        cascade_orphan_job: bool,
    ) -> Result<bool> {
        let hash_key = self.schema.trigger_hash(key);
        if !self.kv.exists(&hash_key).await? {
            return Ok(false);
        }
        // A corrupt record still has to be removable.
        let trigger = match self.load_trigger(key).await {
            Ok(t) => t,
            Err(StoreError::Decode(e)) => {
                tracing::warn!(trigger = %key, error = %e, "removing undecodable trigger");
                None
            }
            Err(e) => return Err(e),
        };

        let encoded = self.schema.encode_trigger_key(key);
        self.kv.del(&hash_key).await?;
        self.kv.srem(&self.schema.triggers(), &encoded).await?;
        self.kv
            .srem(&self.schema.trigger_group(&key.group), &key.name)
            .await?;
        if self.kv.scard(&self.schema.trigger_group(&key.group)).await? == 0 {
            self.kv
                .srem(&self.schema.trigger_groups(), &key.group)
                .await?;
        }
        self.clear_trigger_state(key).await?;
        self.remove_fired_records(key).await?;

        if let Some(trigger) = trigger {
            self.kv
                .srem(&self.schema.job_triggers(&trigger.job_key), &encoded)
                .await?;
            if let Some(cal) = &trigger.calendar_name {
                self.kv
                    .srem(&self.schema.calendar_triggers(cal), &encoded)
                    .await?;
            }
            if cascade_orphan_job {
                if let Some(job) = self.load_job(&trigger.job_key).await? {
                    if !job.durable
                        && self
                            .kv
                            .scard(&self.schema.job_triggers(&trigger.job_key))
                            .await?
                            == 0
                    {
                        self.remove_job_core(&trigger.job_key).await?;
                        tracing::debug!(job = %job.key, "removed orphaned non-durable job");
                    }
                }
            }
        }
        tracing::debug!(trigger = %key, "removed trigger");
        Ok(true)
    }

    /// Swap a trigger for a new one referencing the same job. Returns false
    /// when there was nothing to replace.
    pub async fn replace_trigger(&self, key: &TriggerKey, new_trigger: &Trigger) -> Result<bool> {
        let Some(old) = self.load_trigger(key).await? else {
            return Ok(false);
        };
        if old.job_key != new_trigger.job_key {
            return Err(StoreError::ConstraintViolation(format!(
                "replacement for trigger {key} must keep job {}, got {}",
                old.job_key, new_trigger.job_key
            )));
        }
        self.remove_trigger_core(key, false).await?;
        self.store_trigger(new_trigger, false).await?;
        Ok(true)
    }

    pub async fn retrieve_trigger(&self, key: &TriggerKey) -> Result<Option<Trigger>> {
        self.load_trigger(key).await
    }

    pub async fn trigger_exists(&self, key: &TriggerKey) -> Result<bool> {
        self.kv.exists(&self.schema.trigger_hash(key)).await
    }

    pub async fn number_of_triggers(&self) -> Result<u64> {
        self.kv.scard(&self.schema.triggers()).await
    }

    pub async fn trigger_keys(&self, matcher: &GroupMatcher) -> Result<Vec<TriggerKey>> {
        let mut keys = Vec::new();
        for group in self.kv.smembers(&self.schema.trigger_groups()).await? {
            if !matcher.matches(&group) {
                continue;
            }
            for name in self.kv.smembers(&self.schema.trigger_group(&group)).await? {
                keys.push(TriggerKey::new(name, group.clone()));
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn trigger_group_names(&self) -> Result<Vec<String>> {
        let mut groups = self.kv.smembers(&self.schema.trigger_groups()).await?;
        groups.sort();
        Ok(groups)
    }

    pub async fn triggers_for_job(&self, key: &crate::model::JobKey) -> Result<Vec<Trigger>> {
        let mut triggers = Vec::new();
        for member in self.kv.smembers(&self.schema.job_triggers(key)).await? {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            if let Some(trigger) = self.load_trigger(&trigger_key).await? {
                triggers.push(trigger);
            }
        }
        triggers.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(triggers)
    }

    /// Put an errored trigger back into rotation, provided its record still
    /// exists. Lands in Paused instead of Waiting when its group is paused.
    pub async fn reset_trigger_from_error_state(&self, key: &TriggerKey) -> Result<()> {
        if self.trigger_state(key).await? != Some(TriggerState::Error) {
            return Ok(());
        }
        if !self.kv.exists(&self.schema.trigger_hash(key)).await? {
            // Index entry with no backing record: drop it.
            self.clear_trigger_state(key).await?;
            return Ok(());
        }
        let (score, job_group) = match self.load_trigger(key).await {
            Ok(Some(trigger)) => (
                Self::score(trigger.next_fire_time),
                Some(trigger.job_key.group),
            ),
            // Still undecodable: schedule it anyway so acquisition can
            // re-diagnose it rather than leaving it stranded.
            Ok(None) | Err(StoreError::Decode(_)) => (0.0, None),
            Err(e) => return Err(e),
        };
        let paused = self.is_trigger_group_paused(&key.group).await?
            || match job_group {
                Some(group) => self.is_job_group_paused(&group).await?,
                None => false,
            };
        let state = if paused {
            TriggerState::Paused
        } else {
            TriggerState::Waiting
        };
        self.set_trigger_state(key, state, score).await?;
        tracing::info!(trigger = %key, state = %state, "reset trigger out of error state");
        Ok(())
    }
}
