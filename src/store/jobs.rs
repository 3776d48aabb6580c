use crate::error::{Result, StoreError};
use crate::model::{GroupMatcher, JobDetail, JobKey, Trigger};
use crate::store::Store;

impl Store {
    pub async fn store_job(&self, job: &JobDetail, replace: bool) -> Result<()> {
        self.validate_job_key(&job.key)?;
        let hash_key = self.schema.job_hash(&job.key);
        if !replace && self.kv.exists(&hash_key).await? {
            return Err(StoreError::ObjectAlreadyExists(format!("job {}", job.key)));
        }

        self.kv.hset_all(&hash_key, &job.to_hash()).await?;
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

        self.kv
            .sadd(&self.schema.jobs(), &self.schema.encode_job_key(&job.key))
            .await?;
        self.kv
            .sadd(&self.schema.job_group(&job.key.group), &job.key.name)
            .await?;
        self.kv
            .sadd(&self.schema.job_groups(), &job.key.group)
            .await?;
        tracing::debug!(job = %job.key, replace, "stored job");
        Ok(())
    }

    /// Store a batch of jobs with their triggers. With `replace = false` the
    /// whole batch is checked for collisions up front so a failure leaves
    /// nothing half-written.
    pub async fn store_jobs_and_triggers(
        &self,
        batch: &[(JobDetail, Vec<Trigger>)],
        replace: bool,
    ) -> Result<()> {
        if !replace {
            for (job, triggers) in batch {
                if self.kv.exists(&self.schema.job_hash(&job.key)).await? {
                    return Err(StoreError::ObjectAlreadyExists(format!("job {}", job.key)));
                }
                for trigger in triggers {
                    if self
                        .kv
                        .exists(&self.schema.trigger_hash(&trigger.key))
                        .await?
                    {
                        return Err(StoreError::ObjectAlreadyExists(format!(
                            "trigger {}",
                            trigger.key
                        )));
                    }
                }
            }
        }
        for (job, triggers) in batch {
            self.store_job(job, true).await?;
            for trigger in triggers {
                self.store_trigger(trigger, true).await?;
            }
        }
        Ok(())
    }

    /// Remove a job and every trigger pointing at it. Returns whether the
    /// job existed.
    pub async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        if !self.kv.exists(&self.schema.job_hash(key)).await? {
            return Ok(false);
        }
        for member in self.kv.smembers(&self.schema.job_triggers(key)).await? {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            self.remove_trigger_core(&trigger_key, false).await?;
        }
        self.remove_job_core(key).await?;
        tracing::debug!(job = %key, "removed job");
        Ok(true)
    }

    pub async fn remove_jobs(&self, keys: &[JobKey]) -> Result<bool> {
        let mut all = true;
        for key in keys {
            all &= self.remove_job(key).await?;
        }
        Ok(all)
    }

    /// Delete the job's own records and index entries, leaving its triggers
    /// to the caller.
    pub(crate) async fn remove_job_core(&self, key: &JobKey) -> Result<()> {
        let encoded = self.schema.encode_job_key(key);
        self.kv.del(&self.schema.job_hash(key)).await?;
        self.kv.del(&self.schema.job_data_map(key)).await?;
        self.kv.del(&self.schema.job_triggers(key)).await?;
        self.kv.srem(&self.schema.jobs(), &encoded).await?;
        self.kv.srem(&self.schema.blocked_jobs(), &encoded).await?;
        self.kv
            .srem(&self.schema.job_group(&key.group), &key.name)
            .await?;
        if self.kv.scard(&self.schema.job_group(&key.group)).await? == 0 {
            self.kv
                .srem(&self.schema.job_groups(), &key.group)
                .await?;
        }
        Ok(())
    }

    pub async fn retrieve_job(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.load_job(key).await
    }

    pub async fn job_exists(&self, key: &JobKey) -> Result<bool> {
        self.kv.exists(&self.schema.job_hash(key)).await
    }

    pub async fn number_of_jobs(&self) -> Result<u64> {
        self.kv.scard(&self.schema.jobs()).await
    }

    pub async fn job_keys(&self, matcher: &GroupMatcher) -> Result<Vec<JobKey>> {
        let mut keys = Vec::new();
        for group in self.kv.smembers(&self.schema.job_groups()).await? {
            if !matcher.matches(&group) {
                continue;
            }
            for name in self.kv.smembers(&self.schema.job_group(&group)).await? {
                keys.push(JobKey::new(name, group.clone()));
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub async fn job_group_names(&self) -> Result<Vec<String>> {
        let mut groups = self.kv.smembers(&self.schema.job_groups()).await?;
        groups.sort();
        Ok(groups)
    }
}
