use std::sync::Arc;

use chrono::{DateTime, Utc};
use kg_coordinator::{Coordinator, GraceDeadlineWorker};
use kg_core::schedule::FiringSpec;
use kg_core::{Clock, Reminder, ReminderId};
use kg_reminders::ReminderStore;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

/// The single long-running loop that fires due reminders and advances
/// recurring chains. Reads "now" only through the injected clock so tests
/// can drive it with a [`kg_core::VirtualClock`].
pub struct Scheduler {
    reminders: Arc<ReminderStore>,
    coordinator: Arc<Coordinator>,
    grace: Arc<GraceDeadlineWorker>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    in_flight: Arc<Semaphore>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        reminders: Arc<ReminderStore>,
        coordinator: Arc<Coordinator>,
        grace: Arc<GraceDeadlineWorker>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.queue_capacity));
        Self {
            reminders,
            coordinator,
            grace,
            clock,
            config,
            in_flight,
        }
    }

    /// Run one poll-sleep-fire cycle. Exposed separately from [`Self::run`]
    /// so tests can drive individual ticks deterministically against a
    /// virtual clock instead of racing a spawned background loop.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let now = self.clock.now();
        let due = self.reminders.due_for_firing(now).await?;
        let batch: Vec<ReminderId> = due.into_iter().take(self.config.batch_size).collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let mut fired = 0usize;
        for reminder_id in batch {
            // Back-pressure: if the work queue is saturated, leave the row
            // `scheduled` and pick it back up on the next tick rather than
            // dropping it. `try_acquire_owned` never blocks the loop.
            let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
                debug!(reminder_id = %reminder_id, "work queue saturated, deferring claim");
                break;
            };

            match self.coordinator.fire(&reminder_id, now).await {
                Ok(Some(reminder)) => {
                    fired += 1;
                    let deadline = now + chrono::Duration::minutes(i64::from(reminder.grace_window_minutes));
                    self.grace.arm(reminder_id.clone(), deadline);
                    if let Err(err) = self.advance_recurrence(&reminder, now).await {
                        error!(reminder_id = %reminder_id, %err, "failed to advance recurring chain");
                    }
                }
                Ok(None) => {
                    debug!(reminder_id = %reminder_id, "reminder already claimed by another worker");
                }
                Err(err) => {
                    error!(reminder_id = %reminder_id, %err, "failed to fire reminder");
                }
            }
            drop(permit);
        }

        if fired > 0 {
            info!(count = fired, "fired due reminders");
        }
        Ok(fired)
    }

    /// After a recurring reminder fires, compute its next occurrence from
    /// the cadence it was provisioned with and insert a new `scheduled` row.
    /// This is the sole place recurring chains advance; one-shot reminders
    /// (no `firing_spec`) simply stop here.
    async fn advance_recurrence(
        &self,
        fired: &Reminder,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let Some(spec) = fired.firing_spec.clone() else {
            return Ok(());
        };
        let next_time = next_after(&spec, fired.canonical_firing_time, now)?;

        let mut next = Reminder::new(next_time, fired.recurrence)
            .with_grace_window_minutes(fired.grace_window_minutes)
            .with_firing_spec(spec);
        if let Some(med_id) = &fired.med_id {
            next = next.with_med(med_id.clone());
        }
        if let Some(habit_id) = &fired.habit_id {
            next = next.with_habit(habit_id.clone());
        }
        next.title = fired.title.clone();
        next.description = fired.description.clone();

        self.reminders.create(next).await?;
        Ok(())
    }

    /// Run forever, sleeping until the earliest known firing deadline (or
    /// `poll_interval`, whichever is sooner) between ticks.
    pub async fn run(self: Arc<Self>) {
        info!("scheduler starting");
        loop {
            let now = self.clock.now();
            let next_wakeup = match self.reminders.earliest_firing_deadline().await {
                Ok(Some(deadline)) => deadline.min(now + self.config.poll_interval),
                Ok(None) => now + self.config.poll_interval,
                Err(err) => {
                    warn!(%err, "failed to read earliest firing deadline, falling back to poll interval");
                    now + self.config.poll_interval
                }
            };
            self.clock.sleep_until(next_wakeup).await;

            if let Err(err) = self.tick().await {
                error!(%err, "scheduler tick failed");
            }
        }
    }
}

/// Advance past `after` until a strictly-future occurrence is found. Guards
/// against a fired reminder whose canonical time is still in the past
/// relative to `now` (e.g. the worker was catching up after a restart).
fn next_after(
    spec: &FiringSpec,
    after: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SchedulerError> {
    let mut candidate = kg_core::next_occurrence(spec, after)?;
    while candidate <= now {
        candidate = kg_core::next_occurrence(spec, candidate)?;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kg_bus::EventBus;
    use kg_core::schedule::Cadence;
    use kg_core::{HabitFrequency, RecurrenceKind, VirtualClock};
    use kg_habits::HabitStore;
    use kg_state_memory::MemoryStateStore;

    fn harness(start: DateTime<Utc>) -> (Arc<Scheduler>, Arc<ReminderStore>, Arc<Coordinator>, Arc<VirtualClock>) {
        let state: Arc<dyn kg_state::StateStore> = Arc::new(MemoryStateStore::new());
        let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
        let habits = Arc::new(HabitStore::new(Arc::clone(&state)));
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&state),
            Arc::clone(&reminders),
            Arc::clone(&habits),
            Arc::clone(&bus),
            kg_coordinator::CoordinatorConfig::default(),
        ));
        let clock = Arc::new(VirtualClock::new(start));
        let grace = Arc::new(GraceDeadlineWorker::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&reminders),
            Arc::clone(&coordinator),
            grace,
            clock.clone() as Arc<dyn Clock>,
            SchedulerConfig {
                poll_interval: std::time::Duration::from_secs(30),
                batch_size: 10,
                queue_capacity: 10,
            },
        ));
        (scheduler, reminders, coordinator, clock)
    }

    #[tokio::test]
    async fn tick_fires_due_reminder_and_advances_daily_chain() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let (scheduler, reminders, _coordinator, _clock) = harness(start);

        let spec = FiringSpec {
            cadence: Cadence::DailyAt { hour: 8, minute: 0 },
            timezone: "UTC".to_string(),
        };
        let reminder = Reminder::new(start, RecurrenceKind::Daily).with_firing_spec(spec);
        reminders.create(reminder).await.unwrap();

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 1);

        let all = reminders.list_all().await.unwrap();
        assert_eq!(all.len(), 2, "the fired row plus a freshly-scheduled next occurrence");
        let next = all
            .iter()
            .find(|r| r.state == kg_core::ReminderState::Scheduled)
            .expect("a new scheduled row should exist");
        assert_eq!(next.canonical_firing_time, start + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn tick_does_not_advance_one_shot_reminders() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let (scheduler, reminders, _coordinator, _clock) = harness(start);

        let reminder = Reminder::new(start, RecurrenceKind::None);
        reminders.create(reminder).await.unwrap();

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 1);

        let all = reminders.list_all().await.unwrap();
        assert_eq!(all.len(), 1, "no firing_spec means no chain to advance");
    }

    #[tokio::test]
    async fn tick_arms_grace_deadline_for_fired_reminder() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let state: Arc<dyn kg_state::StateStore> = Arc::new(MemoryStateStore::new());
        let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
        let habits = Arc::new(HabitStore::new(Arc::clone(&state)));
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&state),
            Arc::clone(&reminders),
            Arc::clone(&habits),
            Arc::clone(&bus),
            kg_coordinator::CoordinatorConfig::default(),
        ));
        let clock = Arc::new(VirtualClock::new(start));
        let grace = Arc::new(GraceDeadlineWorker::new());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&reminders),
            coordinator,
            Arc::clone(&grace),
            clock as Arc<dyn Clock>,
            SchedulerConfig {
                poll_interval: std::time::Duration::from_secs(30),
                batch_size: 10,
                queue_capacity: 10,
            },
        ));

        reminders
            .create(Reminder::new(start, RecurrenceKind::None))
            .await
            .unwrap();

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 1);
        assert_eq!(grace.len(), 1, "firing a reminder should arm its grace deadline");
    }

    #[tokio::test]
    async fn tick_respects_batch_size() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let state: Arc<dyn kg_state::StateStore> = Arc::new(MemoryStateStore::new());
        let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
        let habits = Arc::new(HabitStore::new(Arc::clone(&state)));
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&state),
            Arc::clone(&reminders),
            Arc::clone(&habits),
            Arc::clone(&bus),
            kg_coordinator::CoordinatorConfig::default(),
        ));
        let clock = Arc::new(VirtualClock::new(start));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&reminders),
            coordinator,
            Arc::new(GraceDeadlineWorker::new()),
            clock as Arc<dyn Clock>,
            SchedulerConfig {
                poll_interval: std::time::Duration::from_secs(30),
                batch_size: 2,
                queue_capacity: 10,
            },
        ));

        for _ in 0..5 {
            reminders
                .create(Reminder::new(start, RecurrenceKind::None))
                .await
                .unwrap();
        }

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 2, "batch_size caps reminders fired per tick");
    }

    #[tokio::test]
    async fn tick_with_no_due_reminders_fires_nothing() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let (scheduler, reminders, _coordinator, _clock) = harness(start);

        let future = start + chrono::Duration::hours(2);
        reminders
            .create(Reminder::new(future, RecurrenceKind::None))
            .await
            .unwrap();

        let fired = scheduler.tick().await.unwrap();
        assert_eq!(fired, 0);
    }

    #[tokio::test]
    async fn run_wakes_on_virtual_clock_advance_and_fires() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let (scheduler, reminders, _coordinator, clock) = harness(start);

        let due_at = start + chrono::Duration::minutes(10);
        reminders
            .create(Reminder::new(due_at, RecurrenceKind::None))
            .await
            .unwrap();

        let handle = tokio::spawn(scheduler.clone().run());
        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::minutes(11));

        // Give the woken loop a moment to run its tick.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            let all = reminders.list_all().await.unwrap();
            if all
                .iter()
                .any(|r| r.state != kg_core::ReminderState::Scheduled)
            {
                handle.abort();
                return;
            }
        }
        handle.abort();
        panic!("reminder was never fired after clock advance");
    }
}
