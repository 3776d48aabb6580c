use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::model::{Calendar, TriggerState};
use crate::store::Store;

impl Store {
    /// Store a calendar. With `update_triggers`, every trigger referencing
    /// it is re-anchored against the new calendar's exclusions.
    pub async fn store_calendar(
        &self,
        name: &str,
        calendar: &Calendar,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        self.validate_calendar_name(name)?;
        let cal_key = self.schema.calendar(name);
        if !replace && self.kv.exists(&cal_key).await? {
            return Err(StoreError::ObjectAlreadyExists(format!("calendar {name}")));
        }
        let bytes = self.codec.encode(calendar)?;
        self.kv.set(&cal_key, &bytes).await?;
        self.kv.sadd(&self.schema.calendars(), name).await?;
        tracing::debug!(calendar = name, replace, update_triggers, "stored calendar");

        if !update_triggers {
            return Ok(());
        }
        let now = Utc::now();
        for member in self
            .kv
            .smembers(&self.schema.calendar_triggers(name))
            .await?
        {
            let trigger_key = self.schema.decode_trigger_key(&member)?;
            let Some(mut trigger) = self.load_trigger(&trigger_key).await? else {
                // Stale reference left behind by outside interference.
                self.kv
                    .srem(&self.schema.calendar_triggers(name), &member)
                    .await?;
                continue;
            };
            trigger.update_with_calendar(calendar, self.misfire_threshold_ms, now);
            self.kv
                .hset_all(&self.schema.trigger_hash(&trigger_key), &trigger.to_hash())
                .await?;
            match trigger.next_fire_time {
                None => {
                    // Exhausted under the new calendar.
                    self.set_trigger_state(&trigger_key, TriggerState::Completed, Self::score(None))
                        .await?;
                    self.signaler.notify_trigger_finalized(&trigger_key);
                }
                Some(next) => {
                    if let Some((state, _)) = self.find_trigger_state(&member).await? {
                        self.kv
                            .zadd(
                                &self.schema.trigger_state(state),
                                &member,
                                Self::score(Some(next)),
                            )
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove a calendar. Fails when any trigger still references it.
    pub async fn remove_calendar(&self, name: &str) -> Result<bool> {
        if self
            .kv
            .scard(&self.schema.calendar_triggers(name))
            .await?
            > 0
        {
            return Err(StoreError::ConstraintViolation(format!(
                "calendar {name} is still referenced by triggers"
            )));
        }
        let cal_key = self.schema.calendar(name);
        let existed = self.kv.exists(&cal_key).await?;
        self.kv.del(&cal_key).await?;
        self.kv.srem(&self.schema.calendars(), name).await?;
        self.kv.del(&self.schema.calendar_triggers(name)).await?;
        if existed {
            tracing::debug!(calendar = name, "removed calendar");
        }
        Ok(existed)
    }

    pub async fn retrieve_calendar(&self, name: &str) -> Result<Option<Calendar>> {
        self.load_calendar(name).await
    }

    pub async fn calendar_exists(&self, name: &str) -> Result<bool> {
        self.kv.exists(&self.schema.calendar(name)).await
    }

    pub async fn number_of_calendars(&self) -> Result<u64> {
        self.kv.scard(&self.schema.calendars()).await
    }

    pub async fn calendar_names(&self) -> Result<Vec<String>> {
        let mut names = self.kv.smembers(&self.schema.calendars()).await?;
        names.sort();
        Ok(names)
    }
}
