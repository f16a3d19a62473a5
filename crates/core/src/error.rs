use thiserror::Error;

/// Errors surfaced by core domain logic (schedule parsing, clock, ids).
///
/// The schedule parser itself never returns this — it always produces a
/// (possibly fallback) spec — but downstream validation of cron-like
/// schedules and config-sourced timezones does.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid schedule parameter: {0}")]
    InvalidSchedule(String),
}
