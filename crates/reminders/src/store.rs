use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kg_core::{MedId, Reminder, ReminderId, ReminderState};
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::{debug, warn};

use crate::error::ReminderError;

/// TTL on the atomic claim marker used by [`ReminderStore::claim_due`].
/// If the claiming worker crashes before deleting the timeout index entry,
/// the claim expires and a later poll can retry the same reminder.
const CLAIM_TTL: Duration = Duration::from_secs(60);

/// Recover a `ReminderId` from a `"reminder:<id>"` canonical key.
fn id_from_canonical(canonical: &str) -> Option<ReminderId> {
    canonical.strip_prefix("reminder:").map(ReminderId::from)
}

/// Durable reminder store: CRUD plus the atomic-claim and cascading-delete
/// operations the scheduler and medication registry depend on.
pub struct ReminderStore {
    state: Arc<dyn StateStore>,
}

impl ReminderStore {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(id: &ReminderId) -> StateKey {
        StateKey::new(KeyKind::Reminder, id.as_str())
    }

    fn claim_key(id: &ReminderId) -> StateKey {
        StateKey::new(KeyKind::Claim, format!("reminder:{id}"))
    }

    async fn load(&self, id: &ReminderId) -> Result<Reminder, ReminderError> {
        let raw = self
            .state
            .get(&Self::key(id))
            .await?
            .ok_or_else(|| ReminderError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn persist(&self, reminder: &Reminder) -> Result<(), ReminderError> {
        let raw = serde_json::to_string(reminder)?;
        self.state.set(&Self::key(&reminder.id), &raw, None).await?;
        Ok(())
    }

    /// Create a reminder and index it in the scheduler's firing-deadline
    /// index so the scheduler picks it up without scanning every reminder.
    pub async fn create(&self, reminder: Reminder) -> Result<Reminder, ReminderError> {
        self.persist(&reminder).await?;
        self.state
            .index_scheduler_timeout(
                &Self::key(&reminder.id),
                reminder.canonical_firing_time.timestamp_millis(),
            )
            .await?;
        Ok(reminder)
    }

    pub async fn get(&self, id: &ReminderId) -> Result<Reminder, ReminderError> {
        self.load(id).await
    }

    /// Atomically claim a reminder that's due to fire, moving it from the
    /// scheduler timeout index to the grace timeout index. Returns `None`
    /// if another worker already claimed it. The grace deadline is driven
    /// by the reminder's own `grace_window_minutes`, not a caller-supplied
    /// value, so a per-reminder override set at creation time is honored.
    pub async fn claim_due(
        &self,
        id: &ReminderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, ReminderError> {
        let claimed = self
            .state
            .check_and_set(&Self::claim_key(id), "claimed", Some(CLAIM_TTL))
            .await?;
        if !claimed {
            debug!(reminder_id = %id, "reminder already claimed");
            return Ok(None);
        }

        let mut reminder = self.load(id).await?;
        reminder.state = ReminderState::Fired;
        reminder.fired_at = Some(now);
        reminder.snoozed_until = None;
        self.persist(&reminder).await?;

        self.state
            .remove_scheduler_timeout_index(&Self::key(id))
            .await?;
        let grace_deadline = now + chrono::Duration::minutes(i64::from(reminder.grace_window_minutes));
        self.state
            .index_grace_timeout(&Self::key(id), grace_deadline.timestamp_millis())
            .await?;

        Ok(Some(reminder))
    }

    /// List ids of reminders whose firing deadline has elapsed.
    pub async fn due_for_firing(&self, now: DateTime<Utc>) -> Result<Vec<ReminderId>, ReminderError> {
        Ok(self
            .state
            .get_due_scheduler_timeouts(now.timestamp_millis())
            .await?
            .into_iter()
            .filter_map(|canonical| id_from_canonical(&canonical))
            .collect())
    }

    /// The earliest scheduled firing deadline across all reminders, if any.
    /// Used by the scheduler loop to compute its next wakeup.
    pub async fn earliest_firing_deadline(&self) -> Result<Option<DateTime<Utc>>, ReminderError> {
        Ok(self
            .state
            .peek_earliest_scheduler_timeout()
            .await?
            .and_then(DateTime::from_timestamp_millis))
    }

    /// List ids of fired reminders whose grace deadline has elapsed without
    /// confirmation.
    pub async fn due_for_grace_expiry(&self, now: DateTime<Utc>) -> Result<Vec<ReminderId>, ReminderError> {
        Ok(self
            .state
            .get_due_grace_timeouts(now.timestamp_millis())
            .await?
            .into_iter()
            .filter_map(|canonical| id_from_canonical(&canonical))
            .collect())
    }

    /// Every reminder in the store, regardless of state. Used by the
    /// coordinator's startup recovery pass and by cascading deletes.
    pub async fn list_all(&self) -> Result<Vec<Reminder>, ReminderError> {
        let mut reminders = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::Reminder).await? {
            match serde_json::from_str::<Reminder>(&value) {
                Ok(reminder) => reminders.push(reminder),
                Err(_) => warn!("skipping unparseable reminder during list_all"),
            }
        }
        Ok(reminders)
    }

    /// Confirm a fired (or previously-missed, i.e. late) reminder.
    /// Idempotent: confirming an already-`confirmed` reminder is a no-op
    /// that returns the existing row rather than erroring, so a duplicate
    /// scheduler/gateway retry never double-counts.
    pub async fn mark_confirmed(
        &self,
        id: &ReminderId,
        confirmed_at: DateTime<Utc>,
    ) -> Result<Reminder, ReminderError> {
        let mut reminder = self.load(id).await?;
        if reminder.state == ReminderState::Confirmed {
            return Ok(reminder);
        }
        if reminder.state != ReminderState::Fired && reminder.state != ReminderState::Missed {
            return Err(ReminderError::InvalidTransition(id.to_string()));
        }
        reminder.state = ReminderState::Confirmed;
        reminder.confirmed_at = Some(confirmed_at);
        self.persist(&reminder).await?;
        self.state
            .remove_grace_timeout_index(&Self::key(id))
            .await?;
        self.state.delete(&Self::claim_key(id)).await?;
        Ok(reminder)
    }

    /// Transition a fired reminder whose grace window elapsed without
    /// confirmation to `missed`. Idempotent: re-invoking on an
    /// already-`missed` reminder is a no-op.
    pub async fn mark_missed(&self, id: &ReminderId) -> Result<Reminder, ReminderError> {
        let mut reminder = self.load(id).await?;
        if reminder.state == ReminderState::Missed {
            return Ok(reminder);
        }
        if reminder.state != ReminderState::Fired {
            return Err(ReminderError::InvalidTransition(id.to_string()));
        }
        reminder.state = ReminderState::Missed;
        self.persist(&reminder).await?;
        self.state
            .remove_grace_timeout_index(&Self::key(id))
            .await?;
        self.state.delete(&Self::claim_key(id)).await?;
        Ok(reminder)
    }

    /// Snooze a fired reminder: clears the grace deadline, re-arms the
    /// scheduler timeout index at `snooze_until`, and releases the firing
    /// claim so the reminder can be claimed again when it comes due at the
    /// new time. The reminder returns to `scheduled` rather than a distinct
    /// `snoozed` state — `claim_due` re-fires it the same way it fires any
    /// other due reminder. `canonical_firing_time` is left untouched so
    /// lateness on the eventual confirm is still measured from the original
    /// dose time, not the snoozed one; `snoozed_until` carries the new fire
    /// time separately.
    pub async fn snooze(
        &self,
        id: &ReminderId,
        snooze_until: DateTime<Utc>,
    ) -> Result<Reminder, ReminderError> {
        let mut reminder = self.load(id).await?;
        if reminder.state != ReminderState::Fired {
            return Err(ReminderError::InvalidTransition(id.to_string()));
        }
        reminder.state = ReminderState::Scheduled;
        reminder.snooze_count += 1;
        reminder.snoozed_until = Some(snooze_until);
        self.persist(&reminder).await?;

        self.state
            .remove_grace_timeout_index(&Self::key(id))
            .await?;
        self.state
            .index_scheduler_timeout(&Self::key(id), snooze_until.timestamp_millis())
            .await?;
        self.state.delete(&Self::claim_key(id)).await?;

        Ok(reminder)
    }

    /// Delete a single reminder, clearing both timeout indexes and any
    /// outstanding claim marker.
    pub async fn delete(&self, id: &ReminderId) -> Result<(), ReminderError> {
        self.state.delete(&Self::key(id)).await?;
        self.state.remove_scheduler_timeout_index(&Self::key(id)).await?;
        self.state.remove_grace_timeout_index(&Self::key(id)).await?;
        self.state.delete(&Self::claim_key(id)).await?;
        Ok(())
    }

    /// Delete all reminders belonging to a decommissioned medication.
    pub async fn cascade_delete_for_med(&self, med_id: &MedId) -> Result<u64, ReminderError> {
        let all = self.state.scan_keys_by_kind(KeyKind::Reminder).await?;
        let mut deleted = 0u64;
        for (key, value) in all {
            let Ok(reminder) = serde_json::from_str::<Reminder>(&value) else {
                warn!(key, "skipping unparseable reminder during cascade delete");
                continue;
            };
            if reminder.med_id.as_ref() == Some(med_id) {
                self.state.delete(&Self::key(&reminder.id)).await?;
                self.state
                    .remove_scheduler_timeout_index(&Self::key(&reminder.id))
                    .await?;
                self.state
                    .remove_grace_timeout_index(&Self::key(&reminder.id))
                    .await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use kg_core::RecurrenceKind;
    use kg_state_memory::MemoryStateStore;

    use super::*;

    fn store() -> ReminderStore {
        ReminderStore::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn create_and_get_roundtrip() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        store.create(reminder).await.unwrap();

        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.state, ReminderState::Scheduled);
    }

    #[tokio::test]
    async fn claim_due_is_exactly_once() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        store.create(reminder).await.unwrap();

        let now = Utc::now();
        let first = store.claim_due(&id, now).await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().state, ReminderState::Fired);

        let second = store.claim_due(&id, now).await.unwrap();
        assert!(second.is_none(), "second claim should be rejected");
    }

    #[tokio::test]
    async fn confirm_after_fire_clears_grace_index() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        store.create(reminder).await.unwrap();

        let now = Utc::now();
        store.claim_due(&id, now).await.unwrap();

        let grace_due = store.due_for_grace_expiry(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(!grace_due.is_empty());

        store.mark_confirmed(&id, now).await.unwrap();

        let grace_due = store.due_for_grace_expiry(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(grace_due.is_empty(), "confirming should clear the grace index");
    }

    #[tokio::test]
    async fn snooze_rearms_scheduler_index() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        let original_firing_time = reminder.canonical_firing_time;
        store.create(reminder).await.unwrap();

        let now = Utc::now();
        store.claim_due(&id, now).await.unwrap();

        let snooze_until = now + chrono::Duration::minutes(10);
        let snoozed = store.snooze(&id, snooze_until).await.unwrap();
        assert_eq!(snoozed.state, ReminderState::Scheduled);
        assert_eq!(snoozed.snooze_count, 1);
        assert_eq!(snoozed.snoozed_until, Some(snooze_until));
        assert_eq!(
            snoozed.canonical_firing_time, original_firing_time,
            "snoozing must not disturb the original dose time used for lateness"
        );

        let due = store.due_for_firing(snooze_until).await.unwrap();
        assert!(due.contains(&id));
    }

    #[tokio::test]
    async fn confirm_is_idempotent() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        store.create(reminder).await.unwrap();

        let now = Utc::now();
        store.claim_due(&id, now).await.unwrap();

        let first = store.mark_confirmed(&id, now).await.unwrap();
        let second = store.mark_confirmed(&id, now + chrono::Duration::minutes(5)).await.unwrap();
        assert_eq!(first.confirmed_at, second.confirmed_at, "second confirm must be a no-op");
    }

    #[tokio::test]
    async fn delete_clears_reminder_and_indexes() {
        let store = store();
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let id = reminder.id.clone();
        store.create(reminder).await.unwrap();

        let now = Utc::now();
        store.claim_due(&id, now).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.is_err());

        let grace_due = store.due_for_grace_expiry(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(grace_due.is_empty(), "delete should clear the grace index");
        let scheduler_due = store.due_for_firing(now + chrono::Duration::hours(1)).await.unwrap();
        assert!(scheduler_due.is_empty(), "delete should clear the scheduler index");
    }

    #[tokio::test]
    async fn cascade_delete_removes_only_matching_med() {
        let store = store();
        let med_a = MedId::new();
        let med_b = MedId::new();

        let r1 = Reminder::new(Utc::now(), RecurrenceKind::Daily).with_med(med_a.clone());
        let r2 = Reminder::new(Utc::now(), RecurrenceKind::Daily).with_med(med_b.clone());
        store.create(r1).await.unwrap();
        store.create(r2.clone()).await.unwrap();

        let deleted = store.cascade_delete_for_med(&med_a).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.get(&r2.id).await;
        assert!(remaining.is_ok());
    }
}
