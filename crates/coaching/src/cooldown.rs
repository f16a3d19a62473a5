use chrono::{DateTime, TimeZone, Utc};
use kg_core::{CoachingFeedback, PatternKind};

use crate::config::CoachingConfig;
use crate::error::CoachingError;

/// Per-`(kind, med_id)` cooldown before a generated pattern is sent again
/// as a message. `quantity_low` gets its own longer cooldown since
/// restocking takes days, not hours.
#[must_use]
pub fn base_cooldown(kind: PatternKind, config: &CoachingConfig) -> chrono::Duration {
    match kind {
        PatternKind::QuantityLow => config.quantity_low_cooldown,
        _ => config.default_cooldown,
    }
}

/// `true` once `last_sent + cooldown` has passed, or if nothing has been
/// sent yet.
#[must_use]
pub fn cooldown_elapsed(last_sent: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
    match last_sent {
        None => true,
        Some(last_sent) => now >= last_sent + cooldown,
    }
}

/// Negative feedback (`not_helpful`/`dismissed`) doubles the next cooldown
/// for that `(kind, med_id)`, capped at `max_cooldown`, so a user who keeps
/// dismissing the same coaching message gets nagged about it less and
/// less rather than not at all.
#[must_use]
pub fn adjust_cooldown(
    current: chrono::Duration,
    feedback: CoachingFeedback,
    config: &CoachingConfig,
) -> chrono::Duration {
    match feedback {
        CoachingFeedback::Helpful => current,
        CoachingFeedback::NotHelpful | CoachingFeedback::Dismissed => (current * 2).min(config.max_cooldown),
    }
}

/// If `now` (interpreted in the configured household timezone) falls inside
/// the quiet-hours window, returns the `DateTime<Utc>` the window ends at;
/// otherwise returns `now` unchanged. The window may wrap past midnight
/// (the default `22:00`-`07:00` does).
pub fn not_before(now: DateTime<Utc>, config: &CoachingConfig) -> Result<DateTime<Utc>, CoachingError> {
    let tz = kg_core::validate_timezone(&config.timezone)
        .map_err(|_| CoachingError::InvalidTimezone(config.timezone.clone()))?;
    let local_now = now.with_timezone(&tz);
    let local_time = local_now.time();

    let in_quiet_hours = if config.quiet_hours_start <= config.quiet_hours_end {
        local_time >= config.quiet_hours_start && local_time < config.quiet_hours_end
    } else {
        local_time >= config.quiet_hours_start || local_time < config.quiet_hours_end
    };

    if !in_quiet_hours {
        return Ok(now);
    }

    // The window ends today if we're past midnight already (time < end),
    // otherwise it ends tomorrow.
    let end_date = if local_time < config.quiet_hours_end {
        local_now.date_naive()
    } else {
        local_now.date_naive() + chrono::Duration::days(1)
    };
    let end_naive = end_date.and_time(config.quiet_hours_end);
    let end_local = tz
        .from_local_datetime(&end_naive)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&end_naive));
    Ok(end_local.with_timezone(&Utc))
}
