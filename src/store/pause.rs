use std::collections::BTreeSet;

use chrono::Utc;

use crate::error::Result;
use crate::model::{GroupMatcher, JobKey, TriggerKey, TriggerState};
use crate::store::Store;

impl Store {
    /// Pause a single trigger: Waiting/Acquired land in Paused, Blocked in
    /// PausedBlocked. Completed and errored triggers are left alone.
    pub async fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        match self.find_trigger_state(&member).await? {
            Some((TriggerState::Waiting, score)) | Some((TriggerState::Acquired, score)) => {
                self.set_trigger_state(key, TriggerState::Paused, score).await?;
            }
            Some((TriggerState::Blocked, score)) => {
                self.set_trigger_state(key, TriggerState::PausedBlocked, score)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Resume a single trigger, re-evaluating its misfire policy against the
    /// time spent paused. A trigger whose job is still blocked goes to
    /// Blocked rather than Waiting.
    pub async fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let member = self.schema.encode_trigger_key(key);
        match self.find_trigger_state(&member).await? {
            Some((TriggerState::Paused | TriggerState::PausedBlocked, _)) => {}
            _ => return Ok(()),
        }
        let Some(mut trigger) = self.load_trigger(key).await? else {
            self.clear_trigger_state(key).await?;
            return Ok(());
        };

        let now = Utc::now();
        if trigger.is_misfired(now, self.misfire_threshold_ms)
            && self.apply_misfire_overdue(&mut trigger, now).await?
        {
            return Ok(());
        }

        let blocked = self
            .kv
            .sismember(
                &self.schema.blocked_jobs(),
                &self.schema.encode_job_key(&trigger.job_key),
            )
            .await?;
        let next_state = if blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        self.set_trigger_state(key, next_state, Self::score(trigger.next_fire_time))
            .await?;
        Ok(())
    }

    /// Pause every trigger group the matcher selects and flag those groups
    /// paused, so triggers stored into them later start out Paused. Returns
    /// the affected group names.
    pub async fn pause_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .matched_groups(matcher, &self.schema.trigger_groups())
            .await?;
        for group in &groups {
            self.kv
                .sadd(&self.schema.paused_trigger_groups(), group)
                .await?;
            for name in self.kv.smembers(&self.schema.trigger_group(group)).await? {
                self.pause_trigger(&TriggerKey::new(name, group.clone())).await?;
            }
            tracing::info!(group = %group, "paused trigger group");
        }
        Ok(groups)
    }

    /// Resume the matched trigger groups and clear their paused flags.
    pub async fn resume_triggers(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut groups = self
            .matched_groups(matcher, &self.schema.trigger_groups())
            .await?;
        // Paused flags can outlive their members; those still need clearing.
        for group in self
            .kv
            .smembers(&self.schema.paused_trigger_groups())
            .await?
        {
            if matcher.matches(&group) && !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups.sort();
        for group in &groups {
            self.kv
                .srem(&self.schema.paused_trigger_groups(), group)
                .await?;
            for name in self.kv.smembers(&self.schema.trigger_group(group)).await? {
                self.resume_trigger(&TriggerKey::new(name, group.clone())).await?;
            }
            tracing::info!(group = %group, "resumed trigger group");
        }
        Ok(groups)
    }

    pub async fn pause_job(&self, key: &JobKey) -> Result<()> {
        for member in self.kv.smembers(&self.schema.job_triggers(key)).await? {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            self.pause_trigger(&trigger_key).await?;
        }
        Ok(())
    }

    pub async fn resume_job(&self, key: &JobKey) -> Result<()> {
        for member in self.kv.smembers(&self.schema.job_triggers(key)).await? {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            self.resume_trigger(&trigger_key).await?;
        }
        Ok(())
    }

    /// Pause every job group the matcher selects: all triggers of every job
    /// in those groups, plus the group paused flags.
    pub async fn pause_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let groups = self
            .matched_groups(matcher, &self.schema.job_groups())
            .await?;
        for group in &groups {
            self.kv
                .sadd(&self.schema.paused_job_groups(), group)
                .await?;
            for name in self.kv.smembers(&self.schema.job_group(group)).await? {
                self.pause_job(&JobKey::new(name, group.clone())).await?;
            }
            tracing::info!(group = %group, "paused job group");
        }
        Ok(groups)
    }

    pub async fn resume_jobs(&self, matcher: &GroupMatcher) -> Result<Vec<String>> {
        let mut groups = self
            .matched_groups(matcher, &self.schema.job_groups())
            .await?;
        for group in self.kv.smembers(&self.schema.paused_job_groups()).await? {
            if matcher.matches(&group) && !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups.sort();
        for group in &groups {
            self.kv
                .srem(&self.schema.paused_job_groups(), group)
                .await?;
            for name in self.kv.smembers(&self.schema.job_group(group)).await? {
                self.resume_job(&JobKey::new(name, group.clone())).await?;
            }
            tracing::info!(group = %group, "resumed job group");
        }
        Ok(groups)
    }

    pub async fn pause_all(&self) -> Result<()> {
        self.pause_triggers(&GroupMatcher::Anything).await?;
        Ok(())
    }

    /// Resume every trigger group and drop every paused flag, including
    /// flags for groups that currently have no members.
    pub async fn resume_all(&self) -> Result<()> {
        self.resume_triggers(&GroupMatcher::Anything).await?;
        self.kv.del(&self.schema.paused_trigger_groups()).await?;
        Ok(())
    }

    pub async fn paused_trigger_groups(&self) -> Result<Vec<String>> {
        let mut groups = self
            .kv
            .smembers(&self.schema.paused_trigger_groups())
            .await?;
        groups.sort();
        Ok(groups)
    }

    /// Groups selected by a matcher: existing groups that match, plus the
    /// literal name for an equality matcher so a pause can take effect
    /// before the group has members.
    async fn matched_groups(&self, matcher: &GroupMatcher, groups_key: &str) -> Result<Vec<String>> {
        let mut groups = BTreeSet::new();
        if let Some(exact) = matcher.exact() {
            self.validate_group_name(exact)?;
            groups.insert(exact.to_string());
        }
        for group in self.kv.smembers(groups_key).await? {
            if matcher.matches(&group) {
                groups.insert(group);
            }
        }
        Ok(groups.into_iter().collect())
    }
}
