use std::sync::Arc;

use chrono::{DateTime, Utc};
use kg_bus::{Event, EventBus};
use kg_core::schedule::{Cadence, FiringSpec};
use kg_core::{
    AdherenceEvent, AdherenceKind, Habit, HabitFrequency, Medication, RecurrenceKind, Reminder,
    ReminderId, ReminderState,
};
use kg_habits::HabitStore;
use kg_reminders::ReminderStore;
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::info;

use crate::adherence_store::AdherenceEventStore;
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;

/// A confirmation more than this many minutes before the canonical firing
/// time is rejected as too early.
const EARLY_CONFIRM_WINDOW_MINUTES: i64 = 15;

fn recurrence_kind_for(cadence: &Cadence) -> RecurrenceKind {
    match cadence {
        Cadence::DailyAt { .. } => RecurrenceKind::Daily,
        Cadence::WeeklyAt { .. } => RecurrenceKind::Weekly,
        Cadence::EveryNHours { .. } => RecurrenceKind::HourlyN,
        Cadence::Cron { .. } => RecurrenceKind::CronLike,
    }
}

/// Rough doses-per-day used only to project `days_remaining` for the
/// low-quantity check. `Reminder` doesn't carry the hourly-N interval or
/// cron cadence itself (that lives in the medication's parsed schedule), so
/// this is a deliberately coarse approximation rather than an exact
/// reconstruction of the cadence.
fn approx_doses_per_day(recurrence: RecurrenceKind) -> f64 {
    match recurrence {
        RecurrenceKind::Weekly => 1.0 / 7.0,
        RecurrenceKind::None
        | RecurrenceKind::Daily
        | RecurrenceKind::HourlyN
        | RecurrenceKind::CronLike
        | RecurrenceKind::ParsedFallback => 1.0,
    }
}

/// The adherence state machine: the sole mutator of reminder state after
/// creation, the sole writer of habit completions attributed to a reminder,
/// and the owner of the append-only adherence-event log. Also mutates
/// `Medication.quantity_remaining` on confirmed doses, per the data model's
/// explicit carve-out allowing both the registry and the coordinator to
/// write that one field.
pub struct Coordinator {
    state: Arc<dyn StateStore>,
    reminders: Arc<ReminderStore>,
    habits: Arc<HabitStore>,
    adherence: AdherenceEventStore,
    bus: Arc<EventBus>,
    config: CoordinatorConfig,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        reminders: Arc<ReminderStore>,
        habits: Arc<HabitStore>,
        bus: Arc<EventBus>,
        config: CoordinatorConfig,
    ) -> Self {
        let adherence = AdherenceEventStore::new(Arc::clone(&state));
        Self {
            state,
            reminders,
            habits,
            adherence,
            bus,
            config,
        }
    }

    fn med_key(id: &kg_core::MedId) -> StateKey {
        StateKey::new(KeyKind::Medication, id.as_str())
    }

    async fn load_medication(&self, id: &kg_core::MedId) -> Result<Medication, CoordinatorError> {
        let raw = self
            .state
            .get(&Self::med_key(id))
            .await?
            .ok_or_else(|| CoordinatorError::MedicationNotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn persist_medication(&self, med: &Medication) -> Result<(), CoordinatorError> {
        let raw = serde_json::to_string(med)?;
        self.state.set(&Self::med_key(&med.id), &raw, None).await?;
        Ok(())
    }

    /// Create a habit (if the medication has none linked) and the initial
    /// `scheduled` reminder for each firing in the parsed schedule. Each
    /// firing spec starts its own recurrence chain.
    pub async fn provision_reminders(
        &self,
        med: &mut Medication,
        firings: &[FiringSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderId>, CoordinatorError> {
        if med.habit_id.is_none() {
            let habit = Habit::new(med.name.clone(), HabitFrequency::Daily).with_med(med.id.clone());
            med.habit_id = Some(habit.id.clone());
            self.habits.create(habit).await?;
        }

        let mut created = Vec::with_capacity(firings.len());
        for firing in firings {
            let firing_time = kg_core::next_occurrence(firing, now)?;
            let mut reminder = Reminder::new(firing_time, recurrence_kind_for(&firing.cadence))
                .with_med(med.id.clone())
                .with_firing_spec(firing.clone());
            if let Some(habit_id) = &med.habit_id {
                reminder = reminder.with_habit(habit_id.clone());
            }
            let reminder = self.reminders.create(reminder).await?;
            created.push(reminder.id);
        }
        Ok(created)
    }

    /// Replace a medication's active reminder chain after a schedule edit:
    /// existing reminders are cascade-deleted and new ones provisioned from
    /// the updated firing specs. The linked habit (if any) is preserved, so
    /// streak history survives a schedule change.
    pub async fn reprovision_reminders(
        &self,
        med: &mut Medication,
        firings: &[FiringSpec],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderId>, CoordinatorError> {
        self.reminders.cascade_delete_for_med(&med.id).await?;
        self.provision_reminders(med, firings, now).await
    }

    /// Cascade-delete a medication's reminders and (if medication-owned)
    /// its habit. Does not delete the `Medication` row itself — that's the
    /// registry's responsibility.
    pub async fn decommission(&self, med_id: &kg_core::MedId) -> Result<(), CoordinatorError> {
        let med = self.load_medication(med_id).await?;
        self.reminders.cascade_delete_for_med(med_id).await?;
        if let Some(habit_id) = &med.habit_id {
            let habit = self.habits.get(habit_id).await?;
            if habit.med_id.as_ref() == Some(med_id) {
                self.habits.delete(habit_id).await?;
            }
        }
        Ok(())
    }

    /// Claim and fire a due reminder. The scheduler calls this once per
    /// reminder it pulls off the due list; the claim itself (in
    /// [`ReminderStore::claim_due`]) guarantees exactly-once handling.
    pub async fn fire(&self, reminder_id: &ReminderId, now: DateTime<Utc>) -> Result<Option<Reminder>, CoordinatorError> {
        let Some(reminder) = self.reminders.claim_due(reminder_id, now).await? else {
            return Ok(None);
        };
        self.bus.publish(Event::ReminderFired {
            reminder_id: reminder.id.clone(),
            med_id: reminder.med_id.clone(),
            fired_at: now,
        });
        Ok(Some(reminder))
    }

    /// Confirm a fired (or late) reminder. Idempotent: confirming an
    /// already-confirmed reminder returns the stored record without
    /// touching quantity, habit completions, or events a second time.
    pub async fn confirm(&self, reminder_id: &ReminderId, confirmed_at: DateTime<Utc>) -> Result<Reminder, CoordinatorError> {
        let before = self.reminders.get(reminder_id).await?;
        if before.state == ReminderState::Confirmed {
            return Ok(before);
        }

        let minutes_late = (confirmed_at - before.canonical_firing_time).num_minutes();
        if before.state == ReminderState::Fired && minutes_late < -EARLY_CONFIRM_WINDOW_MINUTES {
            return Err(CoordinatorError::TooEarly);
        }
        let kind = if before.state == ReminderState::Missed {
            AdherenceKind::Late
        } else {
            AdherenceKind::Taken
        };

        let reminder = self.reminders.mark_confirmed(reminder_id, confirmed_at).await?;

        let mut quantity_low_threshold_crossed = None;
        if let Some(med_id) = &reminder.med_id {
            let mut med = self.load_medication(med_id).await?;
            med.quantity_remaining = (med.quantity_remaining - 1).max(0);
            med.last_taken_at = Some(confirmed_at);
            let doses_per_day = approx_doses_per_day(reminder.recurrence);
            let days_remaining = med.days_remaining(doses_per_day);
            if days_remaining <= f64::from(med.low_quantity_days) {
                quantity_low_threshold_crossed = Some((med_id.clone(), days_remaining));
            }
            self.persist_medication(&med).await?;
        }

        if let Some(habit_id) = &reminder.habit_id {
            let completion_date = confirmed_at.date_naive();
            let (_, completion) = self.habits.complete(habit_id, completion_date, Some(reminder_id.clone())).await?;
            self.bus.publish(Event::HabitCompleted {
                habit_id: habit_id.clone(),
                completion_date: completion.completion_date,
                reminder_id: Some(reminder_id.clone()),
            });
        }

        let event = AdherenceEvent {
            minutes_late: Some(minutes_late),
            actual_time: Some(confirmed_at),
            ..AdherenceEvent::new(reminder_id.clone(), kind, before.canonical_firing_time)
        };
        let event = AdherenceEvent {
            med_id: reminder.med_id.clone(),
            ..event
        };
        self.adherence.append(event).await?;

        self.bus.publish(Event::ReminderConfirmed {
            reminder_id: reminder_id.clone(),
            confirmed_at,
        });
        self.bus.publish(Event::AdherenceRecorded {
            reminder_id: reminder_id.clone(),
            med_id: reminder.med_id.clone(),
            kind,
            scheduled_time: before.canonical_firing_time,
            minutes_late: Some(minutes_late),
            recorded_at: confirmed_at,
        });
        if let Some((med_id, days_remaining)) = quantity_low_threshold_crossed {
            self.bus.publish(Event::MedicationQuantityLow {
                med_id,
                days_remaining,
                detected_at: confirmed_at,
            });
        }

        info!(reminder_id = %reminder_id, minutes_late, "reminder confirmed");
        Ok(reminder)
    }

    /// Snooze a fired reminder, bounded by `max_snoozes`.
    pub async fn snooze(&self, reminder_id: &ReminderId, now: DateTime<Utc>) -> Result<Reminder, CoordinatorError> {
        let before = self.reminders.get(reminder_id).await?;
        if before.snooze_count >= self.config.max_snoozes {
            return Err(CoordinatorError::SnoozeLimitReached);
        }
        let snooze_until = now + chrono::Duration::minutes(i64::from(self.config.snooze_minutes));
        let reminder = self.reminders.snooze(reminder_id, snooze_until).await?;
        self.bus.publish(Event::ReminderSnoozed {
            reminder_id: reminder_id.clone(),
            snoozed_until: snooze_until,
        });
        Ok(reminder)
    }

    /// Invoked by the grace-deadline worker when a fired reminder's grace
    /// window elapses without confirmation.
    pub async fn grace_elapsed(&self, reminder_id: &ReminderId) -> Result<(), CoordinatorError> {
        let before = self.reminders.get(reminder_id).await?;
        if before.state != ReminderState::Fired {
            return Ok(());
        }
        let reminder = self.reminders.mark_missed(reminder_id).await?;
        let missed_at = Utc::now();

        let event = AdherenceEvent {
            med_id: reminder.med_id.clone(),
            ..AdherenceEvent::new(reminder_id.clone(), AdherenceKind::Missed, reminder.canonical_firing_time)
        };
        self.adherence.append(event).await?;

        self.bus.publish(Event::ReminderMissed {
            reminder_id: reminder_id.clone(),
            med_id: reminder.med_id.clone(),
            missed_at,
        });
        self.bus.publish(Event::AdherenceRecorded {
            reminder_id: reminder_id.clone(),
            med_id: reminder.med_id.clone(),
            kind: AdherenceKind::Missed,
            scheduled_time: reminder.canonical_firing_time,
            minutes_late: None,
            recorded_at: missed_at,
        });
        Ok(())
    }

    /// Adherence history for a medication, unordered. Surfaced by the
    /// gateway's adherence endpoint.
    pub async fn adherence_for_medication(
        &self,
        med_id: &kg_core::MedId,
    ) -> Result<Vec<AdherenceEvent>, CoordinatorError> {
        self.adherence.list_for_medication(med_id).await
    }

    /// Startup recovery: reminders left `fired` with an already-elapsed
    /// grace deadline are transitioned to `missed` immediately; reminders
    /// still within their grace window are returned so the caller can arm
    /// them in a fresh [`crate::GraceDeadlineWorker`].
    pub async fn recover_on_startup(&self, now: DateTime<Utc>) -> Result<Vec<(ReminderId, DateTime<Utc>)>, CoordinatorError> {
        let mut still_pending = Vec::new();
        for reminder in self.reminders.list_all().await? {
            if reminder.state != ReminderState::Fired {
                continue;
            }
            let Some(fired_at) = reminder.fired_at else { continue };
            let deadline = fired_at + chrono::Duration::minutes(i64::from(reminder.grace_window_minutes));
            if deadline <= now {
                self.grace_elapsed(&reminder.id).await?;
            } else {
                still_pending.push((reminder.id, deadline));
            }
        }
        Ok(still_pending)
    }
}
