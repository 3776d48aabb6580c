//! Key derivation for the KV layout.
//!
//! Every key is `{prefix}{D}{kind}{D}{qualifiers...}` with a configurable
//! prefix and delimiter. Entity keys encode (group, name) joined by the
//! delimiter, which is why the delimiter must not occur inside names; the
//! store rejects such names at write time.

use crate::error::StoreError;
use crate::model::{JobKey, TriggerKey, TriggerState};

#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
    delim: String,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>, delim: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delim: delim.into(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delim
    }

    /// True when `name` can be embedded in a key without ambiguity.
    pub fn name_is_valid(&self, name: &str) -> bool {
        !name.is_empty() && !name.contains(self.delim.as_str())
    }

    fn join(&self, parts: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for part in parts {
            key.push_str(&self.delim);
            key.push_str(part);
        }
        key
    }

    // ── Entity keys ───────────────────────────────────────────────────

    pub fn job_hash(&self, key: &JobKey) -> String {
        self.join(&["job", &key.group, &key.name])
    }

    pub fn job_data_map(&self, key: &JobKey) -> String {
        self.join(&["job_data_map", &key.group, &key.name])
    }

    pub fn trigger_hash(&self, key: &TriggerKey) -> String {
        self.join(&["trigger", &key.group, &key.name])
    }

    pub fn calendar(&self, name: &str) -> String {
        self.join(&["calendar", name])
    }

    // ── Index sets ────────────────────────────────────────────────────

    pub fn jobs(&self) -> String {
        self.join(&["jobs"])
    }

    pub fn triggers(&self) -> String {
        self.join(&["triggers"])
    }

    pub fn calendars(&self) -> String {
        self.join(&["calendars"])
    }

    pub fn job_group(&self, group: &str) -> String {
        self.join(&["job_group", group])
    }

    pub fn trigger_group(&self, group: &str) -> String {
        self.join(&["trigger_group", group])
    }

    pub fn job_groups(&self) -> String {
        self.join(&["job_groups"])
    }

    pub fn trigger_groups(&self) -> String {
        self.join(&["trigger_groups"])
    }

    pub fn paused_job_groups(&self) -> String {
        self.join(&["paused_job_groups"])
    }

    pub fn paused_trigger_groups(&self) -> String {
        self.join(&["paused_trigger_groups"])
    }

    pub fn blocked_jobs(&self) -> String {
        self.join(&["blocked_jobs"])
    }

    pub fn job_triggers(&self, key: &JobKey) -> String {
        self.join(&["job_triggers", &key.group, &key.name])
    }

    pub fn calendar_triggers(&self, name: &str) -> String {
        self.join(&["calendar_triggers", name])
    }

    pub fn trigger_state(&self, state: TriggerState) -> String {
        self.join(&["trigger_state", state.set_name()])
    }

    pub fn fired_triggers(&self) -> String {
        self.join(&["fired_triggers"])
    }

    pub fn instance_fired(&self, instance_id: &str) -> String {
        self.join(&["instance_fired", instance_id])
    }

    pub fn lock(&self) -> String {
        self.join(&["lock"])
    }

    // ── Set member encoding ───────────────────────────────────────────

    pub fn encode_job_key(&self, key: &JobKey) -> String {
        format!("{}{}{}", key.group, self.delim, key.name)
    }

    pub fn encode_trigger_key(&self, key: &TriggerKey) -> String {
        format!("{}{}{}", key.group, self.delim, key.name)
    }

    pub fn decode_job_key(&self, member: &str) -> Result<JobKey, StoreError> {
        let (group, name) = self.split_member(member)?;
        Ok(JobKey::new(name, group))
    }

    pub fn decode_trigger_key(&self, member: &str) -> Result<TriggerKey, StoreError> {
        let (group, name) = self.split_member(member)?;
        Ok(TriggerKey::new(name, group))
    }

    fn split_member<'a>(&self, member: &'a str) -> Result<(&'a str, &'a str), StoreError> {
        match member.split_once(self.delim.as_str()) {
            Some((group, name)) if !group.is_empty() && !name.is_empty() => Ok((group, name)),
            _ => Err(StoreError::Decode(format!(
                "malformed key member {member:?}"
            ))),
        }
    }
}
