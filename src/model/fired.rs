use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::calendar::Calendar;
use crate::model::job::JobDetail;
use crate::model::key::{JobKey, TriggerKey};
use crate::model::trigger::Trigger;

/// Transient record of a trigger held by a scheduler instance in Acquired or
/// Executing state. Indexed globally and per owning instance; aged records
/// drive orphan recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredTrigger {
    /// `<encoded trigger key>|<instance id>|<acquire millis>`.
    pub id: String,
    pub trigger_key: TriggerKey,
    pub job_key: JobKey,
    pub instance_id: String,
    pub acquired_at: DateTime<Utc>,
    /// Set once the scheduler reports the trigger fired.
    pub fired_at: Option<DateTime<Utc>>,
    /// The trigger's next fire time as of acquisition.
    pub next_fire_snapshot: Option<DateTime<Utc>>,
    pub executing: bool,
    pub requests_recovery: bool,
}

impl FiredTrigger {
    pub fn new(
        encoded_trigger: &str,
        trigger: &Trigger,
        instance_id: &str,
        requests_recovery: bool,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "{encoded_trigger}|{instance_id}|{}",
                acquired_at.timestamp_millis()
            ),
            trigger_key: trigger.key.clone(),
            job_key: trigger.job_key.clone(),
            instance_id: instance_id.to_string(),
            acquired_at,
            fired_at: None,
            next_fire_snapshot: trigger.next_fire_time,
            executing: false,
            requests_recovery,
        }
    }
}

/// Everything the scheduler needs to run one fire of a trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredResult {
    pub trigger: Trigger,
    pub job: JobDetail,
    pub calendar: Option<Calendar>,
    pub fire_time: DateTime<Utc>,
}
