use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A set of excluded time ranges that filters a trigger's fire times.
///
/// Stored as an opaque blob through the injected codec; the store never
/// inspects calendars beyond asking whether an instant is included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub description: Option<String>,
    /// Half-open `[start, end)` ranges during which fire times are excluded.
    pub excluded: Vec<ExcludedRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcludedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn exclude(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.excluded.push(ExcludedRange { start, end });
        self
    }

    pub fn is_time_included(&self, at: DateTime<Utc>) -> bool {
        !self
            .excluded
            .iter()
            .any(|r| at >= r.start && at < r.end)
    }

    /// First instant at or after `at` that is not excluded.
    ///
    /// Ranges are finite so hopping to the end of whichever range covers the
    /// probe terminates.
    pub fn next_included_time(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let mut probe = at;
        loop {
            match self
                .excluded
                .iter()
                .filter(|r| probe >= r.start && probe < r.end)
                .map(|r| r.end)
                .max()
            {
                Some(end) => probe = end,
                None => return probe,
            }
        }
    }
}
