//! Schedule parser/expander.
//!
//! Converts a free-form schedule string into a canonical, deterministic list
//! of firing specs. The parser never errors: unparseable input always
//! produces the `parsed-fallback` spec plus a diagnostic the registry can
//! surface to the user.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How a firing spec repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// Fires once daily at a fixed local wall-clock time.
    DailyAt { hour: u32, minute: u32 },
    /// Fires once weekly, on a given weekday, at a fixed local wall-clock time.
    WeeklyAt { weekday: WeekdayDef, hour: u32, minute: u32 },
    /// Fires every N hours (2..=24), as a duration from the last firing.
    EveryNHours { hours: u32 },
    /// Cron escape hatch: `minute hour dom mon dow`.
    Cron { expr: String },
}

/// Serde-friendly mirror of `chrono::Weekday` (chrono's doesn't impl Serialize/Deserialize
/// without a feature we don't otherwise need).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeekdayDef {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for WeekdayDef {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }
}

impl From<WeekdayDef> for Weekday {
    fn from(w: WeekdayDef) -> Self {
        match w {
            WeekdayDef::Mon => Self::Mon,
            WeekdayDef::Tue => Self::Tue,
            WeekdayDef::Wed => Self::Wed,
            WeekdayDef::Thu => Self::Thu,
            WeekdayDef::Fri => Self::Fri,
            WeekdayDef::Sat => Self::Sat,
            WeekdayDef::Sun => Self::Sun,
        }
    }
}

/// A single canonical firing within a schedule, with the timezone it is
/// pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiringSpec {
    pub cadence: Cadence,
    pub timezone: String,
}

/// Severity of a parser diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
}

/// The full, deterministic result of parsing a schedule string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub raw: String,
    pub firings: Vec<FiringSpec>,
    pub diagnostics: Vec<Diagnostic>,
    /// `true` when the fallback spec was used because `raw` didn't parse.
    pub is_fallback: bool,
}

/// Parse a schedule string against a user timezone. Never fails: on parse
/// failure, produces a single `09:00 daily` fallback firing plus a
/// diagnostic.
#[must_use]
pub fn parse_schedule(raw: &str, timezone: &str) -> ScheduleSpec {
    let tz = timezone.to_owned();
    let normalized = raw.trim().to_lowercase();

    if let Some(firings) = try_parse_cron(&normalized, &tz) {
        return ScheduleSpec {
            raw: raw.to_owned(),
            firings,
            diagnostics: Vec::new(),
            is_fallback: false,
        };
    }
    if let Some(firings) = try_parse_every_n_hours(&normalized, &tz) {
        return ScheduleSpec {
            raw: raw.to_owned(),
            firings,
            diagnostics: Vec::new(),
            is_fallback: false,
        };
    }
    if let Some(firings) = try_parse_weekly(&normalized, &tz) {
        return ScheduleSpec {
            raw: raw.to_owned(),
            firings,
            diagnostics: Vec::new(),
            is_fallback: false,
        };
    }
    if let Some(firings) = try_parse_n_times_daily(&normalized, &tz) {
        return ScheduleSpec {
            raw: raw.to_owned(),
            firings,
            diagnostics: Vec::new(),
            is_fallback: false,
        };
    }
    if let Some(firings) = try_parse_daily_at(&normalized, &tz) {
        return ScheduleSpec {
            raw: raw.to_owned(),
            firings,
            diagnostics: Vec::new(),
            is_fallback: false,
        };
    }

    fallback(raw, &tz)
}

fn fallback(raw: &str, tz: &str) -> ScheduleSpec {
    ScheduleSpec {
        raw: raw.to_owned(),
        firings: vec![FiringSpec {
            cadence: Cadence::DailyAt { hour: 9, minute: 0 },
            timezone: tz.to_owned(),
        }],
        diagnostics: vec![Diagnostic {
            severity: DiagnosticSeverity::Warning,
            message: format!("could not parse schedule \"{raw}\"; falling back to 09:00 daily"),
        }],
        is_fallback: true,
    }
}

fn try_parse_cron(s: &str, tz: &str) -> Option<Vec<FiringSpec>> {
    let rest = s.strip_prefix("cron:")?.trim();
    if validate_cron_expr(rest).is_err() {
        return None;
    }
    Some(vec![FiringSpec {
        cadence: Cadence::Cron {
            expr: rest.to_owned(),
        },
        timezone: tz.to_owned(),
    }])
}

fn try_parse_every_n_hours(s: &str, tz: &str) -> Option<Vec<FiringSpec>> {
    let rest = s.strip_prefix("every ")?.trim();
    let rest = rest.strip_suffix("hours").or_else(|| rest.strip_suffix("hour"))?;
    let n: u32 = rest.trim().parse().ok()?;
    if !(2..=24).contains(&n) {
        return None;
    }
    Some(vec![FiringSpec {
        cadence: Cadence::EveryNHours { hours: n },
        timezone: tz.to_owned(),
    }])
}

fn try_parse_weekly(s: &str, tz: &str) -> Option<Vec<FiringSpec>> {
    let rest = s.strip_prefix("weekly on ")?;
    let (weekday_str, rest) = rest.split_once(" at ")?;
    let weekday = parse_weekday(weekday_str.trim())?;
    let time = parse_time_of_day(rest.trim())?;
    Some(vec![FiringSpec {
        cadence: Cadence::WeeklyAt {
            weekday: weekday.into(),
            hour: time.hour(),
            minute: time.minute(),
        },
        timezone: tz.to_owned(),
    }])
}

fn try_parse_n_times_daily(s: &str, tz: &str) -> Option<Vec<FiringSpec>> {
    let (count, rest) = if let Some(rest) = s.strip_prefix("twice daily at ") {
        (2usize, rest)
    } else if let Some(rest) = s.strip_prefix("three times daily at ") {
        (3usize, rest)
    } else if let Some((count_str, rest)) = s.split_once(" times daily at ") {
        let count = count_str.trim().parse::<usize>().ok()?;
        (count, rest)
    } else {
        return None;
    };

    let times: Vec<NaiveTime> = rest
        .split(" and ")
        .flat_map(|chunk| chunk.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(parse_time_of_day)
        .collect();

    if times.is_empty() || times.len() != count {
        return None;
    }

    Some(
        times
            .into_iter()
            .map(|t| FiringSpec {
                cadence: Cadence::DailyAt {
                    hour: t.hour(),
                    minute: t.minute(),
                },
                timezone: tz.to_owned(),
            })
            .collect(),
    )
}

fn try_parse_daily_at(s: &str, tz: &str) -> Option<Vec<FiringSpec>> {
    let rest = s.strip_prefix("daily at ")?;
    let time = parse_time_of_day(rest.trim())?;
    Some(vec![FiringSpec {
        cadence: Cadence::DailyAt {
            hour: time.hour(),
            minute: time.minute(),
        },
        timezone: tz.to_owned(),
    }])
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parses `"8am"`, `"8:30am"`, `"08:00"`, `"20:00"`.
fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if let Some(digits) = s.strip_suffix("am").or(s.strip_suffix("a.m.")) {
        return parse_12h(digits.trim(), false);
    }
    if let Some(digits) = s.strip_suffix("pm").or(s.strip_suffix("p.m.")) {
        return parse_12h(digits.trim(), true);
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

fn parse_12h(s: &str, is_pm: bool) -> Option<NaiveTime> {
    let (hour_str, minute_str) = s.split_once(':').unwrap_or((s, "0"));
    let mut hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;
    if hour == 12 {
        hour = 0;
    }
    if is_pm {
        hour += 12;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Validate a `croner`-compatible cron expression (5 fields).
pub fn validate_cron_expr(expr: &str) -> Result<(), CoreError> {
    Cron::new(expr)
        .parse()
        .map(|_| ())
        .map_err(|e| CoreError::InvalidCron(e.to_string()))
}

/// Validate an IANA timezone name.
pub fn validate_timezone(tz: &str) -> Result<Tz, CoreError> {
    tz.parse::<Tz>()
        .map_err(|_| CoreError::InvalidTimezone(tz.to_owned()))
}

/// Compute the next occurrence of `spec` strictly after `after`.
///
/// Daily/weekly cadences are pinned to local wall-clock time in `spec`'s
/// timezone and do not shift across DST (per the Open Question resolution
/// in DESIGN.md): the same local `HH:MM` fires every day regardless of UTC
/// offset changes. `EveryNHours` is duration-based and is therefore exactly
/// `N` hours after `after` in absolute (UTC) time.
///
/// # Errors
///
/// Returns an error if `spec.timezone` or a `Cron` cadence's expression is
/// invalid.
pub fn next_occurrence(spec: &FiringSpec, after: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let tz = validate_timezone(&spec.timezone)?;
    match &spec.cadence {
        Cadence::DailyAt { hour, minute } => Ok(next_daily_at(after, tz, *hour, *minute)),
        Cadence::WeeklyAt {
            weekday,
            hour,
            minute,
        } => Ok(next_weekly_at(after, tz, (*weekday).into(), *hour, *minute)),
        Cadence::EveryNHours { hours } => Ok(after + chrono::Duration::hours(i64::from(*hours))),
        Cadence::Cron { expr } => {
            let cron = Cron::new(expr)
                .parse()
                .map_err(|e| CoreError::InvalidCron(e.to_string()))?;
            let local_after = after.with_timezone(&tz);
            let next_local = cron
                .find_next_occurrence(&local_after, false)
                .map_err(|e| CoreError::InvalidCron(e.to_string()))?;
            Ok(next_local.with_timezone(&Utc))
        }
    }
}

fn next_daily_at(after: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> DateTime<Utc> {
    let local_after = after.with_timezone(&tz);
    let mut candidate_date = local_after.date_naive();
    loop {
        if let Some(candidate) = local_datetime(tz, candidate_date, hour, minute) {
            if candidate > local_after {
                return candidate.with_timezone(&Utc);
            }
        }
        candidate_date = candidate_date.succ_opt().expect("date overflow");
    }
}

fn next_weekly_at(
    after: DateTime<Utc>,
    tz: Tz,
    weekday: Weekday,
    hour: u32,
    minute: u32,
) -> DateTime<Utc> {
    let local_after = after.with_timezone(&tz);
    let mut candidate_date = local_after.date_naive();
    loop {
        if candidate_date.weekday() == weekday {
            if let Some(candidate) = local_datetime(tz, candidate_date, hour, minute) {
                if candidate > local_after {
                    return candidate.with_timezone(&Utc);
                }
            }
        }
        candidate_date = candidate_date.succ_opt().expect("date overflow");
    }
}

fn local_datetime(tz: Tz, date: chrono::NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Some(dt),
        chrono::LocalResult::Ambiguous(dt, _) => Some(dt),
        chrono::LocalResult::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_daily_at() {
        let spec = parse_schedule("daily at 8am", "UTC");
        assert!(!spec.is_fallback);
        assert_eq!(spec.firings.len(), 1);
        assert_eq!(
            spec.firings[0].cadence,
            Cadence::DailyAt { hour: 8, minute: 0 }
        );
    }

    #[test]
    fn parses_twice_daily() {
        let spec = parse_schedule("twice daily at 8am and 8pm", "UTC");
        assert_eq!(spec.firings.len(), 2);
        assert_eq!(
            spec.firings[0].cadence,
            Cadence::DailyAt { hour: 8, minute: 0 }
        );
        assert_eq!(
            spec.firings[1].cadence,
            Cadence::DailyAt {
                hour: 20,
                minute: 0
            }
        );
    }

    #[test]
    fn parses_n_times_daily() {
        let spec = parse_schedule("3 times daily at 8am, 2pm, 8pm", "UTC");
        assert_eq!(spec.firings.len(), 3);
    }

    #[test]
    fn parses_every_n_hours() {
        let spec = parse_schedule("every 6 hours", "UTC");
        assert_eq!(spec.firings.len(), 1);
        assert_eq!(spec.firings[0].cadence, Cadence::EveryNHours { hours: 6 });
    }

    #[test]
    fn rejects_every_n_hours_out_of_range() {
        let spec = parse_schedule("every 1 hours", "UTC");
        assert!(spec.is_fallback);
        let spec = parse_schedule("every 25 hours", "UTC");
        assert!(spec.is_fallback);
    }

    #[test]
    fn parses_weekly_on() {
        let spec = parse_schedule("weekly on sunday at 8:00", "UTC");
        assert_eq!(spec.firings.len(), 1);
        assert_eq!(
            spec.firings[0].cadence,
            Cadence::WeeklyAt {
                weekday: WeekdayDef::Sun,
                hour: 8,
                minute: 0
            }
        );
    }

    #[test]
    fn parses_cron_escape_hatch() {
        let spec = parse_schedule("cron: 0 8 * * *", "UTC");
        assert!(!spec.is_fallback);
        assert_eq!(
            spec.firings[0].cadence,
            Cadence::Cron {
                expr: "0 8 * * *".to_owned()
            }
        );
    }

    #[test]
    fn unparseable_falls_back() {
        let spec = parse_schedule("whenever I feel like it", "UTC");
        assert!(spec.is_fallback);
        assert_eq!(spec.firings.len(), 1);
        assert_eq!(
            spec.firings[0].cadence,
            Cadence::DailyAt { hour: 9, minute: 0 }
        );
        assert_eq!(spec.diagnostics.len(), 1);
    }

    #[test]
    fn parse_is_deterministic() {
        let a = parse_schedule("daily at 8am", "UTC");
        let b = parse_schedule("daily at 8am", "UTC");
        assert_eq!(a, b);
    }

    #[test]
    fn next_occurrence_daily_rolls_to_tomorrow_if_past() {
        let spec = FiringSpec {
            cadence: Cadence::DailyAt { hour: 8, minute: 0 },
            timezone: "UTC".to_owned(),
        };
        let after = utc("2024-01-01T09:00:00Z");
        let next = next_occurrence(&spec, after).unwrap();
        assert_eq!(next, utc("2024-01-02T08:00:00Z"));
    }

    #[test]
    fn next_occurrence_daily_same_day_if_before() {
        let spec = FiringSpec {
            cadence: Cadence::DailyAt { hour: 8, minute: 0 },
            timezone: "UTC".to_owned(),
        };
        let after = utc("2024-01-01T00:00:00Z");
        let next = next_occurrence(&spec, after).unwrap();
        assert_eq!(next, utc("2024-01-01T08:00:00Z"));
    }

    #[test]
    fn next_occurrence_every_n_hours_is_duration_based() {
        let spec = FiringSpec {
            cadence: Cadence::EveryNHours { hours: 6 },
            timezone: "UTC".to_owned(),
        };
        let after = utc("2024-01-01T00:00:00Z");
        let next = next_occurrence(&spec, after).unwrap();
        assert_eq!(next, utc("2024-01-01T06:00:00Z"));
    }

    #[test]
    fn invalid_timezone_errors() {
        assert!(validate_timezone("Not/AZone").is_err());
    }
}
