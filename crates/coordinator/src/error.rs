use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("medication not found: {0}")]
    MedicationNotFound(String),

    #[error("confirmation is more than 15 minutes before the canonical firing time")]
    TooEarly,

    #[error("reminder has reached its maximum snooze count")]
    SnoozeLimitReached,

    #[error(transparent)]
    Schedule(#[from] kg_core::CoreError),

    #[error(transparent)]
    Reminder(#[from] kg_reminders::ReminderError),

    #[error(transparent)]
    Habit(#[from] kg_habits::HabitError),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
