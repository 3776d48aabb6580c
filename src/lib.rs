pub mod codec;
pub mod config;
pub mod error;
pub mod jobstore;
pub mod keys;
pub mod kv;
pub mod lock;
pub mod model;
pub mod signal;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use jobstore::RedisJobStore;
pub use model::{
    Calendar, CompletedInstruction, FiredResult, FiredTrigger, GroupMatcher, IntervalUnit,
    JobDataMap, JobDetail, JobKey, MisfirePolicy, Trigger, TriggerKey, TriggerState,
};
pub use signal::{NoopSignaler, SchedulerSignaler};
