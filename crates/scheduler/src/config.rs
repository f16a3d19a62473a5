use std::time::Duration;

/// Tunables for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on how long the loop sleeps between polls when nothing
    /// is scheduled before then.
    pub poll_interval: Duration,
    /// Maximum number of due reminders claimed per batch.
    pub batch_size: usize,
    /// Capacity of the bounded work queue handed to the coordinator. A
    /// saturated queue defers the claim rather than dropping it.
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
            queue_capacity: 64,
        }
    }
}
