use chrono::{DateTime, Utc};

use crate::model::TriggerKey;

/// Callback surface into the scheduler engine.
///
/// The store invokes these while it holds the distributed mutex, so
/// implementations must return quickly and must not call back into the
/// store.
pub trait SchedulerSignaler: Send + Sync {
    /// A trigger's fire time elapsed past the misfire threshold.
    fn notify_trigger_misfired(&self, key: &TriggerKey);

    /// A trigger will never fire again.
    fn notify_trigger_finalized(&self, key: &TriggerKey);

    /// The set of upcoming fires changed; the scheduler may want to re-poll.
    /// `candidate_next_fire` is the earliest known new fire time, if any.
    fn signal_scheduling_change(&self, candidate_next_fire: Option<DateTime<Utc>>);
}

/// Signaler that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignaler;

impl SchedulerSignaler for NoopSignaler {
    fn notify_trigger_misfired(&self, _key: &TriggerKey) {}
    fn notify_trigger_finalized(&self, _key: &TriggerKey) {}
    fn signal_scheduling_change(&self, _candidate_next_fire: Option<DateTime<Utc>>) {}
}
