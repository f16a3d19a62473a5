pub mod clock;
pub mod domain;
pub mod error;
pub mod schedule;
pub mod types;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use domain::{
    AdherenceEvent, AdherenceKind, AdminToken, CoachingFeedback, CoachingMessage, Habit,
    HabitCompletion, HabitFrequency, Medication, ParsedSchedule, Pattern, PatternKind,
    RecurrenceKind, Reminder, ReminderState, random_event_id,
};
pub use error::CoreError;
pub use schedule::{
    Cadence, Diagnostic, DiagnosticSeverity, FiringSpec, ScheduleSpec, WeekdayDef,
    next_occurrence, parse_schedule, validate_cron_expr, validate_timezone,
};
pub use types::{
    AdherenceEventId, AdminTokenId, CoachingMessageId, HabitCompletionId, HabitId, MedId,
    PatternId, ReminderId,
};
