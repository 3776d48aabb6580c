pub mod calendar;
pub mod fired;
pub mod job;
pub mod key;
pub mod matcher;
pub mod trigger;

pub use calendar::{Calendar, ExcludedRange};
pub use fired::{FiredResult, FiredTrigger};
pub use job::{JobDataMap, JobDetail};
pub use key::{JobKey, TriggerKey};
pub use matcher::GroupMatcher;
pub use trigger::{
    CompletedInstruction, IntervalUnit, MisfirePolicy, Trigger, TriggerSchedule, TriggerState,
    DEFAULT_PRIORITY,
};
