use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Reminder(#[from] kg_reminders::ReminderError),

    #[error(transparent)]
    Coordinator(#[from] kg_coordinator::CoordinatorError),

    #[error(transparent)]
    Schedule(#[from] kg_core::CoreError),
}
