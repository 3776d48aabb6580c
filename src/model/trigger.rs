use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveTime, Utc, Weekday};
use cron::Schedule;

use crate::error::StoreError;
use crate::model::calendar::Calendar;
use crate::model::key::{JobKey, TriggerKey};

pub const DEFAULT_PRIORITY: i32 = 5;

/// Where a trigger currently sits in its lifecycle. Each state is backed by
/// its own sorted-set index; a trigger is a member of exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerState {
    Waiting,
    Paused,
    Acquired,
    Executing,
    Completed,
    Blocked,
    PausedBlocked,
    Error,
}

impl TriggerState {
    pub const ALL: [TriggerState; 8] = [
        TriggerState::Waiting,
        TriggerState::Paused,
        TriggerState::Acquired,
        TriggerState::Executing,
        TriggerState::Completed,
        TriggerState::Blocked,
        TriggerState::PausedBlocked,
        TriggerState::Error,
    ];

    pub fn set_name(&self) -> &'static str {
        match self {
            TriggerState::Waiting => "waiting",
            TriggerState::Paused => "paused",
            TriggerState::Acquired => "acquired",
            TriggerState::Executing => "executing",
            TriggerState::Completed => "completed",
            TriggerState::Blocked => "blocked",
            TriggerState::PausedBlocked => "paused_blocked",
            TriggerState::Error => "error",
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.set_name())
    }
}

/// What to do with a trigger whose fire time elapsed while it was unfireable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfirePolicy {
    /// Resolve per trigger type: simple schedules fire once immediately and
    /// continue from now, the rest advance to the next instant at or after
    /// now.
    Smart,
    /// Leave the fire time alone; the scheduler fires all missed instants.
    Ignore,
    /// Fire once immediately, then continue on schedule.
    FireNow,
    /// Skip missed instants and continue at the next one after now.
    Reschedule,
}

impl MisfirePolicy {
    pub fn code(&self) -> i32 {
        match self {
            MisfirePolicy::Smart => 0,
            MisfirePolicy::Ignore => -1,
            MisfirePolicy::FireNow => 1,
            MisfirePolicy::Reschedule => 2,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, StoreError> {
        match code {
            0 => Ok(MisfirePolicy::Smart),
            -1 => Ok(MisfirePolicy::Ignore),
            1 => Ok(MisfirePolicy::FireNow),
            2 => Ok(MisfirePolicy::Reschedule),
            other => Err(StoreError::Decode(format!(
                "unknown misfire instruction code {other}"
            ))),
        }
    }
}

/// Instruction the scheduler reports when a job execution finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedInstruction {
    NoInstruction,
    DeleteTrigger,
    SetTriggerComplete,
    SetTriggerError,
    SetAllJobTriggersComplete,
    SetAllJobTriggersError,
}

/// Unit of a calendar-interval schedule step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalUnit::Second => "second",
            IntervalUnit::Minute => "minute",
            IntervalUnit::Hour => "hour",
            IntervalUnit::Day => "day",
            IntervalUnit::Week => "week",
            IntervalUnit::Month => "month",
            IntervalUnit::Year => "year",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "second" => Ok(IntervalUnit::Second),
            "minute" => Ok(IntervalUnit::Minute),
            "hour" => Ok(IntervalUnit::Hour),
            "day" => Ok(IntervalUnit::Day),
            "week" => Ok(IntervalUnit::Week),
            "month" => Ok(IntervalUnit::Month),
            "year" => Ok(IntervalUnit::Year),
            other => Err(StoreError::Decode(format!("unknown interval unit {other}"))),
        }
    }

    /// Fixed step length, where one exists. Months and years step through
    /// calendar arithmetic instead.
    fn fixed_ms(&self) -> Option<u64> {
        match self {
            IntervalUnit::Second => Some(1_000),
            IntervalUnit::Minute => Some(60_000),
            IntervalUnit::Hour => Some(3_600_000),
            IntervalUnit::Day => Some(86_400_000),
            IntervalUnit::Week => Some(604_800_000),
            IntervalUnit::Month | IntervalUnit::Year => None,
        }
    }
}

/// The recurrence rule of a trigger. All times are UTC.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSchedule {
    Cron {
        expression: String,
    },
    Simple {
        interval_ms: u64,
        /// Additional fires after the first; -1 repeats forever.
        repeat_count: i32,
        times_triggered: u32,
    },
    CalendarInterval {
        interval: u32,
        unit: IntervalUnit,
    },
    DailyTimeInterval {
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_ms: u64,
        days_of_week: Vec<Weekday>,
    },
}

impl TriggerSchedule {
    fn type_name(&self) -> &'static str {
        match self {
            TriggerSchedule::Cron { .. } => "cron",
            TriggerSchedule::Simple { .. } => "simple",
            TriggerSchedule::CalendarInterval { .. } => "calendar_interval",
            TriggerSchedule::DailyTimeInterval { .. } => "daily_time_interval",
        }
    }
}

/// A schedule bound to a job, producing a sequence of fire times.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub description: Option<String>,
    pub calendar_name: Option<String>,
    pub priority: i32,
    pub misfire_policy: MisfirePolicy,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub schedule: TriggerSchedule,
}

impl Trigger {
    fn with_schedule(key: TriggerKey, job_key: JobKey, schedule: TriggerSchedule) -> Self {
        Self {
            key,
            job_key,
            description: None,
            calendar_name: None,
            priority: DEFAULT_PRIORITY,
            misfire_policy: MisfirePolicy::Smart,
            start_time: Utc::now(),
            end_time: None,
            next_fire_time: None,
            previous_fire_time: None,
            schedule,
        }
    }

    pub fn cron(key: TriggerKey, job_key: JobKey, expression: impl Into<String>) -> Self {
        Self::with_schedule(
            key,
            job_key,
            TriggerSchedule::Cron {
                expression: expression.into(),
            },
        )
    }

    pub fn simple(key: TriggerKey, job_key: JobKey, interval_ms: u64, repeat_count: i32) -> Self {
        Self::with_schedule(
            key,
            job_key,
            TriggerSchedule::Simple {
                interval_ms,
                repeat_count,
                times_triggered: 0,
            },
        )
    }

    /// A trigger that fires exactly once at its start time.
    pub fn one_shot(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        Self::simple(key, job_key, 0, 0).with_start_time(at)
    }

    pub fn calendar_interval(
        key: TriggerKey,
        job_key: JobKey,
        interval: u32,
        unit: IntervalUnit,
    ) -> Self {
        Self::with_schedule(
            key,
            job_key,
            TriggerSchedule::CalendarInterval { interval, unit },
        )
    }

    pub fn daily_time_interval(
        key: TriggerKey,
        job_key: JobKey,
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_ms: u64,
        days_of_week: Vec<Weekday>,
    ) -> Self {
        Self::with_schedule(
            key,
            job_key,
            TriggerSchedule::DailyTimeInterval {
                window_start,
                window_end,
                interval_ms,
                days_of_week,
            },
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_calendar(mut self, name: impl Into<String>) -> Self {
        self.calendar_name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_misfire_policy(mut self, policy: MisfirePolicy) -> Self {
        self.misfire_policy = policy;
        self
    }

    pub fn with_start_time(mut self, at: DateTime<Utc>) -> Self {
        self.start_time = at;
        self
    }

    pub fn with_end_time(mut self, at: DateTime<Utc>) -> Self {
        self.end_time = Some(at);
        self
    }

    pub fn with_next_fire_time(mut self, at: DateTime<Utc>) -> Self {
        self.next_fire_time = Some(at);
        self
    }

    /// Reject schedules the store cannot evaluate.
    pub fn validate(&self) -> Result<(), StoreError> {
        match &self.schedule {
            TriggerSchedule::Cron { expression } => {
                Schedule::from_str(expression).map_err(|e| {
                    StoreError::ConstraintViolation(format!(
                        "trigger {} has an invalid cron expression: {e}",
                        self.key
                    ))
                })?;
            }
            TriggerSchedule::Simple {
                interval_ms,
                repeat_count,
                ..
            } => {
                if *repeat_count != 0 && *interval_ms == 0 {
                    return Err(StoreError::ConstraintViolation(format!(
                        "trigger {} repeats but has a zero interval",
                        self.key
                    )));
                }
            }
            TriggerSchedule::CalendarInterval { interval, .. } => {
                if *interval == 0 {
                    return Err(StoreError::ConstraintViolation(format!(
                        "trigger {} has a zero calendar interval",
                        self.key
                    )));
                }
            }
            TriggerSchedule::DailyTimeInterval {
                window_start,
                window_end,
                days_of_week,
                ..
            } => {
                if window_end < window_start {
                    return Err(StoreError::ConstraintViolation(format!(
                        "trigger {} daily window ends before it starts",
                        self.key
                    )));
                }
                if days_of_week.is_empty() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "trigger {} fires on no day of the week",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }

    /// First fire instant strictly after `after`, honoring the calendar's
    /// exclusions. Returns None when the schedule is exhausted.
    pub fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        calendar: Option<&Calendar>,
    ) -> Option<DateTime<Utc>> {
        let mut probe = after;
        loop {
            let candidate = self.schedule_fire_after(probe)?;
            match calendar {
                Some(cal) if !cal.is_time_included(candidate) => {
                    // Hop past the exclusion, then take the first schedule
                    // instant at or after the landing point.
                    probe = cal.next_included_time(candidate) - Duration::milliseconds(1);
                }
                _ => return Some(candidate),
            }
        }
    }

    /// Initial fire time for a freshly stored trigger: the first instant at
    /// or after the start time.
    pub fn compute_first_fire(&mut self, calendar: Option<&Calendar>) {
        let just_before_start = self.start_time - Duration::milliseconds(1);
        self.next_fire_time = self.fire_time_after(just_before_start, calendar);
    }

    /// Advance past one fire: previous takes the instant just consumed and
    /// next moves to the following one.
    pub fn triggered(&mut self, calendar: Option<&Calendar>) {
        self.previous_fire_time = self.next_fire_time;
        self.next_fire_time = self
            .previous_fire_time
            .and_then(|prev| self.fire_time_after(prev, calendar));
        if let TriggerSchedule::Simple {
            times_triggered, ..
        } = &mut self.schedule
        {
            *times_triggered += 1;
        }
    }

    pub fn is_misfired(&self, now: DateTime<Utc>, threshold_ms: u64) -> bool {
        match self.next_fire_time {
            Some(next) => next + Duration::milliseconds(threshold_ms as i64) < now,
            None => false,
        }
    }

    /// Recompute the next fire time per the misfire policy. The result is
    /// never earlier than `now`.
    pub fn apply_misfire(&mut self, calendar: Option<&Calendar>, now: DateTime<Utc>) {
        let fire_now = || match self.end_time {
            Some(end) if now > end => None,
            _ => Some(now),
        };
        self.next_fire_time = match self.misfire_policy {
            MisfirePolicy::Ignore => self.next_fire_time,
            MisfirePolicy::FireNow => fire_now(),
            MisfirePolicy::Smart => match self.schedule {
                TriggerSchedule::Simple { .. } => fire_now(),
                _ => self.fire_time_after(now - Duration::milliseconds(1), calendar),
            },
            MisfirePolicy::Reschedule => self.fire_time_after(now, calendar),
        };
    }

    /// Re-anchor the next fire time after the referenced calendar changed.
    /// Keeps the old instant when the new calendar still allows it; a result
    /// further in the past than the misfire threshold snaps forward to now.
    pub fn update_with_calendar(
        &mut self,
        calendar: &Calendar,
        misfire_threshold_ms: u64,
        now: DateTime<Utc>,
    ) {
        let Some(old_next) = self.next_fire_time else {
            return;
        };
        self.next_fire_time =
            self.fire_time_after(old_next - Duration::milliseconds(1), Some(calendar));
        if let Some(next) = self.next_fire_time {
            if next < now && (now - next) > Duration::milliseconds(misfire_threshold_ms as i64) {
                self.next_fire_time = self.fire_time_after(now, Some(calendar));
            }
        }
    }

    /// First raw schedule instant strictly after `after`, before calendar
    /// filtering. Bounded below by the start time and above by the end time.
    fn schedule_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let effective = if self.start_time > after {
            self.start_time - Duration::milliseconds(1)
        } else {
            after
        };

        let candidate = match &self.schedule {
            TriggerSchedule::Cron { expression } => {
                let schedule = Schedule::from_str(expression).ok()?;
                schedule.after(&effective).next()?
            }
            TriggerSchedule::Simple {
                interval_ms,
                repeat_count,
                ..
            } => {
                if effective < self.start_time {
                    self.start_time
                } else {
                    if *interval_ms == 0 {
                        return None;
                    }
                    let elapsed = (effective - self.start_time).num_milliseconds() as u64;
                    let n = elapsed / interval_ms + 1;
                    if *repeat_count >= 0 && n > *repeat_count as u64 {
                        return None;
                    }
                    self.start_time + Duration::milliseconds((n * interval_ms) as i64)
                }
            }
            TriggerSchedule::CalendarInterval { interval, unit } => {
                match unit.fixed_ms() {
                    Some(unit_ms) => {
                        if effective < self.start_time {
                            self.start_time
                        } else {
                            let step = *interval as u64 * unit_ms;
                            let elapsed =
                                (effective - self.start_time).num_milliseconds() as u64;
                            let n = elapsed / step + 1;
                            self.start_time + Duration::milliseconds((n * step) as i64)
                        }
                    }
                    None => {
                        let step_months = match unit {
                            IntervalUnit::Year => interval * 12,
                            _ => *interval,
                        };
                        let mut candidate = self.start_time;
                        while candidate <= effective {
                            candidate = candidate.checked_add_months(Months::new(step_months))?;
                        }
                        candidate
                    }
                }
            }
            TriggerSchedule::DailyTimeInterval {
                window_start,
                window_end,
                interval_ms,
                days_of_week,
            } => self.daily_fire_after(
                effective,
                *window_start,
                *window_end,
                *interval_ms,
                days_of_week,
            )?,
        };

        match self.end_time {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }

    fn daily_fire_after(
        &self,
        after: DateTime<Utc>,
        window_start: NaiveTime,
        window_end: NaiveTime,
        interval_ms: u64,
        days_of_week: &[Weekday],
    ) -> Option<DateTime<Utc>> {
        let mut day = after.date_naive();
        // A full week plus the partial starting day bounds the scan.
        for _ in 0..8 {
            if days_of_week.contains(&day.weekday()) {
                let ws = day.and_time(window_start).and_utc();
                let we = day.and_time(window_end).and_utc();
                let candidate = if after < ws {
                    ws
                } else if interval_ms > 0 {
                    let elapsed = (after - ws).num_milliseconds() as u64;
                    let n = elapsed / interval_ms + 1;
                    ws + Duration::milliseconds((n * interval_ms) as i64)
                } else {
                    // Zero interval fires only at the window start, which has
                    // already passed on this day.
                    we + Duration::milliseconds(1)
                };
                if candidate > after && candidate <= we {
                    return Some(candidate);
                }
            }
            day = day.succ_opt()?;
        }
        None
    }

    pub(crate) fn to_hash(&self) -> Vec<(String, String)> {
        let opt_ms = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.timestamp_millis().to_string()).unwrap_or_default()
        };
        let mut fields = vec![
            ("job_group".to_string(), self.job_key.group.clone()),
            ("job_name".to_string(), self.job_key.name.clone()),
            (
                "description".to_string(),
                self.description.clone().unwrap_or_default(),
            ),
            (
                "calendar".to_string(),
                self.calendar_name.clone().unwrap_or_default(),
            ),
            ("priority".to_string(), self.priority.to_string()),
            (
                "misfire".to_string(),
                self.misfire_policy.code().to_string(),
            ),
            (
                "start".to_string(),
                self.start_time.timestamp_millis().to_string(),
            ),
            ("end".to_string(), opt_ms(self.end_time)),
            ("next_fire".to_string(), opt_ms(self.next_fire_time)),
            ("prev_fire".to_string(), opt_ms(self.previous_fire_time)),
            (
                "schedule_type".to_string(),
                self.schedule.type_name().to_string(),
            ),
        ];
        match &self.schedule {
            TriggerSchedule::Cron { expression } => {
                fields.push(("cron_expression".to_string(), expression.clone()));
            }
            TriggerSchedule::Simple {
                interval_ms,
                repeat_count,
                times_triggered,
            } => {
                fields.push(("repeat_interval".to_string(), interval_ms.to_string()));
                fields.push(("repeat_count".to_string(), repeat_count.to_string()));
                fields.push(("times_triggered".to_string(), times_triggered.to_string()));
            }
            TriggerSchedule::CalendarInterval { interval, unit } => {
                fields.push(("interval".to_string(), interval.to_string()));
                fields.push(("interval_unit".to_string(), unit.as_str().to_string()));
            }
            TriggerSchedule::DailyTimeInterval {
                window_start,
                window_end,
                interval_ms,
                days_of_week,
            } => {
                fields.push((
                    "window_start".to_string(),
                    window_start.format("%H:%M:%S").to_string(),
                ));
                fields.push((
                    "window_end".to_string(),
                    window_end.format("%H:%M:%S").to_string(),
                ));
                fields.push(("daily_interval".to_string(), interval_ms.to_string()));
                fields.push((
                    "days_of_week".to_string(),
                    days_of_week
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                ));
            }
        }
        fields
    }

    pub(crate) fn from_hash(
        key: TriggerKey,
        fields: &HashMap<String, String>,
    ) -> Result<Self, StoreError> {
        let field = |name: &str| {
            fields.get(name).ok_or_else(|| {
                StoreError::Decode(format!("trigger {key} is missing field {name}"))
            })
        };
        let malformed =
            |name: &str| StoreError::Decode(format!("trigger {key} has malformed field {name}"));
        let parse_ms = |name: &str| -> Result<DateTime<Utc>, StoreError> {
            let ms = field(name)?.parse::<i64>().map_err(|_| malformed(name))?;
            DateTime::from_timestamp_millis(ms).ok_or_else(|| malformed(name))
        };
        let parse_opt_ms = |name: &str| -> Result<Option<DateTime<Utc>>, StoreError> {
            match field(name)?.as_str() {
                "" => Ok(None),
                s => {
                    let ms = s.parse::<i64>().map_err(|_| malformed(name))?;
                    DateTime::from_timestamp_millis(ms)
                        .map(Some)
                        .ok_or_else(|| malformed(name))
                }
            }
        };
        let parse_num = |name: &str| -> Result<u64, StoreError> {
            field(name)?.parse::<u64>().map_err(|_| malformed(name))
        };

        let schedule = match field("schedule_type")?.as_str() {
            "cron" => {
                let expression = field("cron_expression")?.clone();
                Schedule::from_str(&expression)
                    .map_err(|_| malformed("cron_expression"))?;
                TriggerSchedule::Cron { expression }
            }
            "simple" => TriggerSchedule::Simple {
                interval_ms: parse_num("repeat_interval")?,
                repeat_count: field("repeat_count")?
                    .parse::<i32>()
                    .map_err(|_| malformed("repeat_count"))?,
                times_triggered: field("times_triggered")?
                    .parse::<u32>()
                    .map_err(|_| malformed("times_triggered"))?,
            },
            "calendar_interval" => TriggerSchedule::CalendarInterval {
                interval: field("interval")?
                    .parse::<u32>()
                    .map_err(|_| malformed("interval"))?,
                unit: IntervalUnit::parse(field("interval_unit")?)?,
            },
            "daily_time_interval" => TriggerSchedule::DailyTimeInterval {
                window_start: NaiveTime::parse_from_str(field("window_start")?, "%H:%M:%S")
                    .map_err(|_| malformed("window_start"))?,
                window_end: NaiveTime::parse_from_str(field("window_end")?, "%H:%M:%S")
                    .map_err(|_| malformed("window_end"))?,
                interval_ms: parse_num("daily_interval")?,
                days_of_week: field("days_of_week")?
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.parse::<Weekday>().map_err(|_| malformed("days_of_week")))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            other => {
                return Err(StoreError::Decode(format!(
                    "trigger {key} has unknown schedule type {other}"
                )))
            }
        };

        Ok(Self {
            job_key: JobKey::new(field("job_name")?.clone(), field("job_group")?.clone()),
            description: fields
                .get("description")
                .filter(|s| !s.is_empty())
                .cloned(),
            calendar_name: fields.get("calendar").filter(|s| !s.is_empty()).cloned(),
            priority: field("priority")?
                .parse::<i32>()
                .map_err(|_| malformed("priority"))?,
            misfire_policy: MisfirePolicy::from_code(
                field("misfire")?
                    .parse::<i32>()
                    .map_err(|_| malformed("misfire"))?,
            )?,
            start_time: parse_ms("start")?,
            end_time: parse_opt_ms("end")?,
            next_fire_time: parse_opt_ms("next_fire")?,
            previous_fire_time: parse_opt_ms("prev_fire")?,
            schedule,
            key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn simple(interval_ms: u64, repeat_count: i32) -> Trigger {
        Trigger::simple(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            interval_ms,
            repeat_count,
        )
        .with_start_time(t(1_000))
    }

    #[test]
    fn test_simple_fire_sequence() {
        let trig = simple(10_000, 2);
        assert_eq!(trig.fire_time_after(t(0), None), Some(t(1_000)));
        assert_eq!(trig.fire_time_after(t(1_000), None), Some(t(1_010)));
        assert_eq!(trig.fire_time_after(t(1_010), None), Some(t(1_020)));
        // Two repeats after the first fire, then exhausted.
        assert_eq!(trig.fire_time_after(t(1_020), None), None);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let trig = Trigger::one_shot(TriggerKey::new("t", "g"), JobKey::new("j", "g"), t(500));
        assert_eq!(trig.fire_time_after(t(0), None), Some(t(500)));
        assert_eq!(trig.fire_time_after(t(500), None), None);
    }

    #[test]
    fn test_end_time_bounds_fires() {
        let trig = simple(10_000, -1).with_end_time(t(1_015));
        assert_eq!(trig.fire_time_after(t(1_000), None), Some(t(1_010)));
        assert_eq!(trig.fire_time_after(t(1_010), None), None);
    }

    #[test]
    fn test_cron_fire_after() {
        let trig = Trigger::cron(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            "0 0 * * * *",
        )
        .with_start_time(t(0));
        // Top of the next hour.
        assert_eq!(trig.fire_time_after(t(10), None), Some(t(3_600)));
        assert_eq!(trig.fire_time_after(t(3_600), None), Some(t(7_200)));
    }

    #[test]
    fn test_calendar_interval_months() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let trig = Trigger::calendar_interval(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            1,
            IntervalUnit::Month,
        )
        .with_start_time(start);
        let next = trig.fire_time_after(start, None).unwrap();
        // Jan 31 + 1 month clamps to Feb 28.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_daily_time_interval_respects_window_and_days() {
        // 2026-08-03 is a Monday.
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap();
        let trig = Trigger::daily_time_interval(
            TriggerKey::new("t", "g"),
            JobKey::new("j", "g"),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            1_800_000,
            vec![Weekday::Mon, Weekday::Wed],
        )
        .with_start_time(monday);

        let first = trig.fire_time_after(monday, None).unwrap();
        assert_eq!(first, Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap());
        let second = trig.fire_time_after(first, None).unwrap();
        assert_eq!(second, Utc.with_ymd_and_hms(2026, 8, 3, 9, 30, 0).unwrap());
        let last = trig
            .fire_time_after(Utc.with_ymd_and_hms(2026, 8, 3, 9, 30, 0).unwrap(), None)
            .unwrap();
        assert_eq!(last, Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap());
        // Window exhausted on Monday; Tuesday is not in the day set.
        let next_day = trig.fire_time_after(last, None).unwrap();
        assert_eq!(next_day, Utc.with_ymd_and_hms(2026, 8, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_calendar_exclusion_pushes_fire_time() {
        let trig = simple(10_000, -1);
        let cal = Calendar::new().exclude(t(1_005), t(1_025));
        // 1010 and 1020 are excluded; 1030 is the first allowed instant.
        assert_eq!(trig.fire_time_after(t(1_000), Some(&cal)), Some(t(1_030)));
    }

    #[test]
    fn test_misfire_never_moves_backward() {
        let now = t(5_000);
        for policy in [
            MisfirePolicy::Smart,
            MisfirePolicy::FireNow,
            MisfirePolicy::Reschedule,
        ] {
            let mut trig = simple(10_000, -1).with_misfire_policy(policy);
            trig.compute_first_fire(None);
            assert!(trig.is_misfired(now, 1_000));
            trig.apply_misfire(None, now);
            let next = trig.next_fire_time.expect("policy should keep firing");
            assert!(next >= now, "{policy:?} produced {next} before {now}");
        }
    }

    #[test]
    fn test_misfire_ignore_keeps_old_fire_time() {
        let mut trig = simple(10_000, -1).with_misfire_policy(MisfirePolicy::Ignore);
        trig.compute_first_fire(None);
        let before = trig.next_fire_time;
        trig.apply_misfire(None, t(5_000));
        assert_eq!(trig.next_fire_time, before);
    }

    #[test]
    fn test_triggered_advances_and_counts() {
        let mut trig = simple(10_000, 2);
        trig.compute_first_fire(None);
        assert_eq!(trig.next_fire_time, Some(t(1_000)));

        trig.triggered(None);
        assert_eq!(trig.previous_fire_time, Some(t(1_000)));
        assert_eq!(trig.next_fire_time, Some(t(1_010)));

        trig.triggered(None);
        trig.triggered(None);
        assert_eq!(trig.next_fire_time, None);
        match trig.schedule {
            TriggerSchedule::Simple {
                times_triggered, ..
            } => assert_eq!(times_triggered, 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_hash_roundtrip_all_types() {
        // Explicit start times: the hash stores milliseconds, so sub-ms
        // precision from Utc::now() would not survive the round trip.
        let daily = Trigger::daily_time_interval(
            TriggerKey::new("d", "g"),
            JobKey::new("j", "g"),
            NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            60_000,
            vec![Weekday::Mon, Weekday::Fri],
        )
        .with_start_time(t(2_000));
        let triggers = [
            Trigger::cron(TriggerKey::new("c", "g"), JobKey::new("j", "g"), "0 * * * * *")
                .with_calendar("holidays")
                .with_priority(9)
                .with_start_time(t(2_000)),
            simple(10_000, 5).with_description("every ten seconds"),
            Trigger::calendar_interval(
                TriggerKey::new("ci", "g"),
                JobKey::new("j", "g"),
                3,
                IntervalUnit::Month,
            )
            .with_start_time(t(2_000))
            .with_end_time(t(10_000_000)),
            daily,
        ];
        for trig in triggers {
            let fields: HashMap<String, String> = trig.to_hash().into_iter().collect();
            let decoded = Trigger::from_hash(trig.key.clone(), &fields).unwrap();
            assert_eq!(decoded, trig);
        }
    }

    #[test]
    fn test_from_hash_rejects_bad_cron() {
        let trig = Trigger::cron(TriggerKey::new("c", "g"), JobKey::new("j", "g"), "0 * * * * *");
        let mut fields: HashMap<String, String> = trig.to_hash().into_iter().collect();
        fields.insert("cron_expression".to_string(), "not a schedule".to_string());
        let err = Trigger::from_hash(trig.key.clone(), &fields).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }
}
