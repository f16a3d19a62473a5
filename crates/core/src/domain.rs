use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::ScheduleSpec;
use crate::types::{
    AdherenceEventId, AdminTokenId, CoachingMessageId, HabitCompletionId, HabitId, MedId,
    PatternId, ReminderId,
};

/// A medication the user is tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: MedId,
    pub name: String,
    pub dosage: String,
    pub quantity_remaining: i64,
    pub low_quantity_days: u32,
    pub schedule_raw: String,
    pub timezone: String,
    pub prescriber: Option<String>,
    pub instructions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_taken_at: Option<DateTime<Utc>>,
    pub next_dose_at: Option<DateTime<Utc>>,
    /// Set when the schedule parser fell back to the default spec.
    pub schedule_diagnostic: Option<String>,
    pub habit_id: Option<HabitId>,
}

impl Medication {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        dosage: impl Into<String>,
        quantity_remaining: i64,
        schedule_raw: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            id: MedId::new(),
            name: name.into(),
            dosage: dosage.into(),
            quantity_remaining,
            low_quantity_days: 7,
            schedule_raw: schedule_raw.into(),
            timezone: timezone.into(),
            prescriber: None,
            instructions: None,
            created_at: Utc::now(),
            last_taken_at: None,
            next_dose_at: None,
            schedule_diagnostic: None,
            habit_id: None,
        }
    }

    #[must_use]
    pub fn with_prescriber(mut self, prescriber: impl Into<String>) -> Self {
        self.prescriber = Some(prescriber.into());
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn with_low_quantity_days(mut self, days: u32) -> Self {
        self.low_quantity_days = days;
        self
    }

    /// Days of supply remaining at current consumption rate (one dose/day is
    /// the conservative default when the cadence can't be cheaply derived).
    #[must_use]
    pub fn days_remaining(&self, doses_per_day: f64) -> f64 {
        if doses_per_day <= 0.0 {
            f64::INFINITY
        } else {
            f64::from(i32::try_from(self.quantity_remaining).unwrap_or(0)) / doses_per_day
        }
    }
}

/// Reminder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    Scheduled,
    Fired,
    Confirmed,
    Missed,
    Snoozed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceKind {
    None,
    Daily,
    Weekly,
    HourlyN,
    CronLike,
    /// Produced when the schedule parser fell back to its default spec.
    ParsedFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub med_id: Option<MedId>,
    pub habit_id: Option<HabitId>,
    /// Canonical local wall-clock firing time, in UTC for storage but
    /// computed against the medication's timezone.
    pub canonical_firing_time: DateTime<Utc>,
    pub recurrence: RecurrenceKind,
    pub state: ReminderState,
    pub fired_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub snooze_count: u32,
    /// Set while a snooze is pending re-fire; cleared once the reminder
    /// fires again. Kept separate from `canonical_firing_time`, which must
    /// stay pinned to the original dose time so lateness is always measured
    /// from when the dose was actually due, not from the snoozed time.
    pub snoozed_until: Option<DateTime<Utc>>,
    pub grace_window_minutes: u32,
    /// Present for reminders created via the frontend-friendly schema
    /// (`POST /reminders`) rather than from a medication schedule.
    pub title: Option<String>,
    pub description: Option<String>,
    /// The firing spec this reminder was provisioned from. Carried on the
    /// row (rather than looked up from the medication) so the scheduler can
    /// advance a recurring chain without a second round-trip to the
    /// medication registry.
    pub firing_spec: Option<crate::schedule::FiringSpec>,
}

impl Reminder {
    #[must_use]
    pub fn new(canonical_firing_time: DateTime<Utc>, recurrence: RecurrenceKind) -> Self {
        Self {
            id: ReminderId::new(),
            med_id: None,
            habit_id: None,
            canonical_firing_time,
            recurrence,
            state: ReminderState::Scheduled,
            fired_at: None,
            confirmed_at: None,
            snooze_count: 0,
            snoozed_until: None,
            grace_window_minutes: 30,
            title: None,
            description: None,
            firing_spec: None,
        }
    }

    #[must_use]
    pub fn with_firing_spec(mut self, firing_spec: crate::schedule::FiringSpec) -> Self {
        self.firing_spec = Some(firing_spec);
        self
    }

    #[must_use]
    pub fn with_med(mut self, med_id: MedId) -> Self {
        self.med_id = Some(med_id);
        self
    }

    #[must_use]
    pub fn with_habit(mut self, habit_id: HabitId) -> Self {
        self.habit_id = Some(habit_id);
        self
    }

    #[must_use]
    pub fn with_grace_window_minutes(mut self, minutes: u32) -> Self {
        self.grace_window_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HabitFrequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    pub frequency: HabitFrequency,
    pub med_id: Option<MedId>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_completions: u64,
    pub created_at: DateTime<Utc>,
}

impl Habit {
    #[must_use]
    pub fn new(name: impl Into<String>, frequency: HabitFrequency) -> Self {
        Self {
            id: HabitId::new(),
            name: name.into(),
            frequency,
            med_id: None,
            current_streak: 0,
            longest_streak: 0,
            total_completions: 0,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_med(mut self, med_id: MedId) -> Self {
        self.med_id = Some(med_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitCompletion {
    pub id: HabitCompletionId,
    pub habit_id: HabitId,
    pub completion_date: NaiveDate,
    pub count: u32,
    pub reminder_id: Option<ReminderId>,
}

impl HabitCompletion {
    #[must_use]
    pub fn new(habit_id: HabitId, completion_date: NaiveDate) -> Self {
        Self {
            id: HabitCompletionId::new(),
            habit_id,
            completion_date,
            count: 1,
            reminder_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceKind {
    Taken,
    Missed,
    Snoozed,
    Late,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdherenceEvent {
    pub id: AdherenceEventId,
    pub med_id: Option<MedId>,
    pub reminder_id: ReminderId,
    pub kind: AdherenceKind,
    pub scheduled_time: DateTime<Utc>,
    pub actual_time: Option<DateTime<Utc>>,
    pub minutes_late: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl AdherenceEvent {
    #[must_use]
    pub fn new(reminder_id: ReminderId, kind: AdherenceKind, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: AdherenceEventId::new(),
            med_id: None,
            reminder_id,
            kind,
            scheduled_time,
            actual_time: None,
            minutes_late: None,
            created_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    LateOnWeekday,
    MissOnWeekday,
    AdherenceTrendUp,
    AdherenceTrendDown,
    QuantityLow,
    /// Raised directly off a single `dose.missed` event, independent of the
    /// weekday-aggregate `MissOnWeekday` detector which needs several
    /// samples before it can fire.
    MissedDose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub med_id: MedId,
    pub kind: PatternKind,
    pub confidence: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachingFeedback {
    Helpful,
    NotHelpful,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingMessage {
    pub id: CoachingMessageId,
    pub user: String,
    pub med_id: Option<MedId>,
    pub kind: String,
    pub text: String,
    pub generated_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub feedback: Option<CoachingFeedback>,
    pub not_before: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminToken {
    pub id: AdminTokenId,
    /// SHA-256 hex digest of the raw token, used for a constant-time
    /// candidate lookup before the (comparatively expensive) bcrypt verify.
    pub fingerprint: String,
    pub hash: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AdminToken {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(exp) => now < exp,
            None => true,
        }
    }
}

/// A freshly-parsed schedule, bundled with the diagnostics the registry
/// surfaces to the user on create/update.
#[derive(Debug, Clone)]
pub struct ParsedSchedule {
    pub spec: ScheduleSpec,
}

/// Generate a random event id for an `AdherenceEvent` created outside its
/// constructor (e.g. when replaying from a log for tests).
#[must_use]
pub fn random_event_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medication_builder() {
        let med = Medication::new("Lisinopril", "10mg", 30, "daily at 08:00", "UTC")
            .with_prescriber("Dr. Smith")
            .with_low_quantity_days(5);
        assert_eq!(med.prescriber.as_deref(), Some("Dr. Smith"));
        assert_eq!(med.low_quantity_days, 5);
        assert_eq!(med.quantity_remaining, 30);
    }

    #[test]
    fn reminder_serde_roundtrip() {
        let reminder = Reminder::new(Utc::now(), RecurrenceKind::Daily);
        let json = serde_json::to_string(&reminder).unwrap();
        let back: Reminder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, reminder.id);
        assert_eq!(back.state, ReminderState::Scheduled);
    }

    #[test]
    fn admin_token_active_checks_expiry_and_revocation() {
        let now = Utc::now();
        let mut token = AdminToken {
            id: AdminTokenId::new(),
            fingerprint: "f".into(),
            hash: "x".into(),
            scopes: vec!["admin".into()],
            created_at: now,
            expires_at: Some(now + chrono::Duration::hours(1)),
            revoked_at: None,
        };
        assert!(token.is_active(now));
        token.revoked_at = Some(now);
        assert!(!token.is_active(now));
    }
}
