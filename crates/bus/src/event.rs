use chrono::{DateTime, NaiveDate, Utc};
use kg_core::{AdherenceKind, HabitId, MedId, PatternId, ReminderId};
use serde::{Deserialize, Serialize};

/// The set of facts the rest of Kilo Guardian reacts to.
///
/// Every event carries its own timestamp rather than relying on
/// delivery-time `Utc::now()`, so a retried or delayed delivery doesn't
/// lie about when the underlying fact occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    MedicationAdded {
        med_id: MedId,
        added_at: DateTime<Utc>,
    },
    MedicationUpdated {
        med_id: MedId,
        updated_at: DateTime<Utc>,
    },
    MedicationDeleted {
        med_id: MedId,
        deleted_at: DateTime<Utc>,
    },
    ReminderFired {
        reminder_id: ReminderId,
        med_id: Option<MedId>,
        fired_at: DateTime<Utc>,
    },
    ReminderConfirmed {
        reminder_id: ReminderId,
        confirmed_at: DateTime<Utc>,
    },
    ReminderSnoozed {
        reminder_id: ReminderId,
        snoozed_until: DateTime<Utc>,
    },
    ReminderMissed {
        reminder_id: ReminderId,
        med_id: Option<MedId>,
        missed_at: DateTime<Utc>,
    },
    AdherenceRecorded {
        reminder_id: ReminderId,
        med_id: Option<MedId>,
        kind: AdherenceKind,
        scheduled_time: DateTime<Utc>,
        minutes_late: Option<i64>,
        recorded_at: DateTime<Utc>,
    },
    HabitCompleted {
        habit_id: HabitId,
        completion_date: NaiveDate,
        reminder_id: Option<ReminderId>,
    },
    MedicationQuantityLow {
        med_id: MedId,
        days_remaining: f64,
        detected_at: DateTime<Utc>,
    },
    PatternDetected {
        pattern_id: PatternId,
        med_id: MedId,
        detected_at: DateTime<Utc>,
    },
    CoachingMessageReady {
        med_id: Option<MedId>,
        message_id: kg_core::CoachingMessageId,
        ready_at: DateTime<Utc>,
    },
}

impl Event {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::MedicationAdded { .. } => "medication_added",
            Self::MedicationUpdated { .. } => "medication_updated",
            Self::MedicationDeleted { .. } => "medication_deleted",
            Self::ReminderFired { .. } => "reminder_fired",
            Self::ReminderConfirmed { .. } => "reminder_confirmed",
            Self::ReminderSnoozed { .. } => "reminder_snoozed",
            Self::ReminderMissed { .. } => "reminder_missed",
            Self::AdherenceRecorded { .. } => "adherence_recorded",
            Self::HabitCompleted { .. } => "habit_completed",
            Self::MedicationQuantityLow { .. } => "medication_quantity_low",
            Self::PatternDetected { .. } => "pattern_detected",
            Self::CoachingMessageReady { .. } => "coaching_message_ready",
        }
    }
}
