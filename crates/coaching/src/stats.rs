use chrono::{DateTime, Datelike, Utc, Weekday};
use kg_core::AdherenceKind;

/// One adherence outcome folded into a medication's rolling window. Built
/// directly from `Event::AdherenceRecorded`'s fields rather than re-reading
/// the durable adherence log, so the coaching engine needs no dependency on
/// `kg-coordinator`.
#[derive(Debug, Clone)]
pub struct AdherenceSample {
    pub kind: AdherenceKind,
    pub scheduled_time: DateTime<Utc>,
    pub minutes_late: Option<i64>,
    pub recorded_at: DateTime<Utc>,
}

/// Adherence rate over a trailing window: `taken / scheduled`, where
/// `scheduled` is reconstructed from samples that reached a terminal fired
/// outcome (`taken`, `late`, or `missed`) and `taken` counts both on-time
/// and late confirmations. A reminder that is missed and later confirmed
/// late contributes one sample of each kind, which slightly inflates both
/// sides of the ratio — a deliberately coarse approximation, the same
/// texture as `kg-coordinator`'s `approx_doses_per_day`.
#[must_use]
pub fn adherence_rate(samples: &[AdherenceSample], now: DateTime<Utc>, window_days: i64) -> f64 {
    let window_start = now - chrono::Duration::days(window_days);
    let in_window: Vec<&AdherenceSample> = samples
        .iter()
        .filter(|s| s.scheduled_time >= window_start && s.scheduled_time <= now)
        .collect();

    let scheduled = in_window
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                AdherenceKind::Taken | AdherenceKind::Late | AdherenceKind::Missed
            )
        })
        .count();
    if scheduled == 0 {
        return 1.0;
    }
    let taken = in_window
        .iter()
        .filter(|s| matches!(s.kind, AdherenceKind::Taken | AdherenceKind::Late))
        .count();
    #[allow(clippy::cast_precision_loss)]
    let rate = taken as f64 / scheduled as f64;
    rate
}

/// Mean minutes-late per weekday over a trailing window, counting only
/// samples that have a `minutes_late` value and were actually late
/// (`minutes_late > 0`). Returns `(weekday, mean_minutes, sample_count)`
/// for every weekday with at least one late sample.
#[must_use]
pub fn mean_minutes_late_by_weekday(
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    window_weeks: i64,
) -> Vec<(Weekday, f64, u32)> {
    let window_start = now - chrono::Duration::weeks(window_weeks);
    let mut buckets: std::collections::BTreeMap<Weekday, (i64, u32)> = std::collections::BTreeMap::new();

    for sample in samples {
        if sample.scheduled_time < window_start || sample.scheduled_time > now {
            continue;
        }
        let Some(minutes_late) = sample.minutes_late else {
            continue;
        };
        if minutes_late <= 0 {
            continue;
        }
        let weekday = sample.scheduled_time.weekday();
        let entry = buckets.entry(weekday).or_insert((0, 0));
        entry.0 += minutes_late;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(weekday, (total, count))| {
            #[allow(clippy::cast_precision_loss)]
            let mean = total as f64 / f64::from(count);
            (weekday, mean, count)
        })
        .collect()
}

/// Miss rate per weekday over a trailing window: missed samples divided by
/// all terminal-outcome samples scheduled on that weekday. Returns
/// `(weekday, miss_rate, sample_count)` for weekdays with at least one
/// terminal sample.
#[must_use]
pub fn miss_rate_by_weekday(
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    window_weeks: i64,
) -> Vec<(Weekday, f64, u32)> {
    let window_start = now - chrono::Duration::weeks(window_weeks);
    let mut buckets: std::collections::BTreeMap<Weekday, (u32, u32)> = std::collections::BTreeMap::new();

    for sample in samples {
        if sample.scheduled_time < window_start || sample.scheduled_time > now {
            continue;
        }
        if !matches!(
            sample.kind,
            AdherenceKind::Taken | AdherenceKind::Late | AdherenceKind::Missed
        ) {
            continue;
        }
        let weekday = sample.scheduled_time.weekday();
        let entry = buckets.entry(weekday).or_insert((0, 0));
        entry.1 += 1;
        if matches!(sample.kind, AdherenceKind::Missed) {
            entry.0 += 1;
        }
    }

    buckets
        .into_iter()
        .map(|(weekday, (missed, total))| (weekday, f64::from(missed) / f64::from(total), total))
        .collect()
}

/// Streak of consecutive on-time confirmations walking backward from the
/// most recent sample, ordered by `scheduled_time`.
#[must_use]
pub fn current_on_time_streak(samples: &[AdherenceSample]) -> u32 {
    let mut ordered: Vec<&AdherenceSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.scheduled_time);

    let mut streak = 0u32;
    for sample in ordered.iter().rev() {
        let on_time = matches!(sample.kind, AdherenceKind::Taken)
            && sample.minutes_late.is_some_and(|m| m <= 0);
        if on_time {
            streak += 1;
        } else if matches!(sample.kind, AdherenceKind::Taken | AdherenceKind::Late | AdherenceKind::Missed) {
            break;
        }
    }
    streak
}

/// Weekly adherence rate series for the last `weeks` full weeks, oldest
/// first — the input to the adherence-trend slope.
#[must_use]
pub fn weekly_adherence_series(samples: &[AdherenceSample], now: DateTime<Utc>, weeks: usize) -> Vec<f64> {
    (0..weeks)
        .rev()
        .map(|weeks_ago| {
            let week_end = now - chrono::Duration::weeks(weeks_ago as i64);
            let week_start = week_end - chrono::Duration::weeks(1);
            let in_week: Vec<AdherenceSample> = samples
                .iter()
                .filter(|s| s.scheduled_time > week_start && s.scheduled_time <= week_end)
                .cloned()
                .collect();
            adherence_rate(&in_week, week_end, 7)
        })
        .collect()
}

/// Ordinary-least-squares slope of `y` against its index `0..y.len()`.
/// Returns `0.0` for fewer than two points.
#[must_use]
pub fn linear_slope(y: &[f64]) -> f64 {
    let n = y.len();
    if n < 2 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n_f = n as f64;
    let sum_x: f64 = (0..n).map(|i| i as f64).sum();
    let sum_y: f64 = y.iter().sum();
    let sum_xy: f64 = y.iter().enumerate().map(|(i, v)| i as f64 * v).sum();
    let sum_xx: f64 = (0..n).map(|i| (i as f64).powi(2)).sum();

    let denom = n_f * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (n_f * sum_xy - sum_x * sum_y) / denom
}
