use std::collections::HashMap;

use crate::error::StoreError;
use crate::model::key::JobKey;

/// Opaque per-job payload handed to the executing job class.
pub type JobDataMap = HashMap<String, String>;

/// Definition of an executable unit, named by (group, name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDetail {
    pub key: JobKey,
    /// Identifier the scheduler uses to resolve the executable job class.
    pub job_class: String,
    pub description: Option<String>,
    /// A durable job persists without any triggers referencing it.
    pub durable: bool,
    /// Re-fire this job if its scheduler dies while executing it.
    pub requests_recovery: bool,
    /// Forbid overlapping executions of this job across the cluster.
    pub disallow_concurrent: bool,
    /// Write the (possibly mutated) data map back after each execution.
    pub persist_data_after_execution: bool,
    pub data: JobDataMap,
}

impl JobDetail {
    pub fn new(key: JobKey, job_class: impl Into<String>) -> Self {
        Self {
            key,
            job_class: job_class.into(),
            description: None,
            durable: false,
            requests_recovery: false,
            disallow_concurrent: false,
            persist_data_after_execution: false,
            data: JobDataMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn requests_recovery(mut self, requests_recovery: bool) -> Self {
        self.requests_recovery = requests_recovery;
        self
    }

    pub fn disallow_concurrent(mut self, disallow: bool) -> Self {
        self.disallow_concurrent = disallow;
        self
    }

    pub fn persist_data_after_execution(mut self, persist: bool) -> Self {
        self.persist_data_after_execution = persist;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub(crate) fn to_hash(&self) -> Vec<(String, String)> {
        vec![
            ("class".to_string(), self.job_class.clone()),
            (
                "description".to_string(),
                self.description.clone().unwrap_or_default(),
            ),
            ("durable".to_string(), self.durable.to_string()),
            (
                "requests_recovery".to_string(),
                self.requests_recovery.to_string(),
            ),
            (
                "disallow_concurrent".to_string(),
                self.disallow_concurrent.to_string(),
            ),
            (
                "persist_data".to_string(),
                self.persist_data_after_execution.to_string(),
            ),
        ]
    }

    pub(crate) fn from_hash(
        key: JobKey,
        fields: &HashMap<String, String>,
        data: JobDataMap,
    ) -> Result<Self, StoreError> {
        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| StoreError::Decode(format!("job {key} is missing field {name}")))
        };
        let flag = |name: &str| -> Result<bool, StoreError> {
            field(name)?
                .parse::<bool>()
                .map_err(|_| StoreError::Decode(format!("job {key} has malformed field {name}")))
        };

        Ok(Self {
            job_class: field("class")?.clone(),
            description: fields
                .get("description")
                .filter(|s| !s.is_empty())
                .cloned(),
            durable: flag("durable")?,
            requests_recovery: flag("requests_recovery")?,
            disallow_concurrent: flag("disallow_concurrent")?,
            persist_data_after_execution: flag("persist_data")?,
            data,
            key,
        })
    }
}
