use chrono::{DateTime, Datelike, Utc, Weekday};
use kg_core::{MedId, Pattern, PatternId, PatternKind};
use serde_json::json;

use crate::config::CoachingConfig;
use crate::stats::{self, AdherenceSample};

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Surfaces the single worst weekday for lateness, if its mean minutes-late
/// clears the configured threshold on enough samples. `Pattern`'s
/// superseding key is `(med_id, kind)` with no per-weekday sub-key, so only
/// the worst offender can be represented at a time — the weekday rides
/// along in `parameters` for the message template to read back out.
#[must_use]
pub fn late_on_weekday(
    med_id: &MedId,
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    config: &CoachingConfig,
) -> Option<Pattern> {
    let by_weekday = stats::mean_minutes_late_by_weekday(samples, now, 4);
    let worst = by_weekday
        .into_iter()
        .filter(|(_, mean, count)| *mean >= config.late_threshold_minutes as f64 && *count >= config.min_samples)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let (weekday, mean_minutes, count) = worst;
    let confidence = (f64::from(count) / 10.0).min(1.0);

    Some(Pattern {
        id: PatternId::new(),
        med_id: med_id.clone(),
        kind: PatternKind::LateOnWeekday,
        confidence,
        window_start: now - chrono::Duration::weeks(4),
        window_end: now,
        description: format!("doses on {} run {mean_minutes:.0} minutes late on average", weekday_name(weekday)),
        parameters: json!({
            "weekday": weekday_name(weekday),
            "mean_minutes_late": mean_minutes,
            "sample_count": count,
        }),
    })
}

/// Surfaces the single worst weekday for missed doses, mirroring
/// [`late_on_weekday`]'s one-pattern-per-key constraint.
#[must_use]
pub fn miss_on_weekday(
    med_id: &MedId,
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    config: &CoachingConfig,
) -> Option<Pattern> {
    let by_weekday = stats::miss_rate_by_weekday(samples, now, 4);
    let worst = by_weekday
        .into_iter()
        .filter(|(_, rate, count)| *rate >= config.miss_rate_threshold && *count >= config.min_samples)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let (weekday, rate, count) = worst;
    let confidence = (f64::from(count) / 10.0).min(1.0);

    Some(Pattern {
        id: PatternId::new(),
        med_id: med_id.clone(),
        kind: PatternKind::MissOnWeekday,
        confidence,
        window_start: now - chrono::Duration::weeks(4),
        window_end: now,
        description: format!("doses on {} are missed {:.0}% of the time", weekday_name(weekday), rate * 100.0),
        parameters: json!({
            "weekday": weekday_name(weekday),
            "miss_rate": rate,
            "sample_count": count,
        }),
    })
}

fn trend(
    med_id: &MedId,
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    config: &CoachingConfig,
    kind: PatternKind,
    wants_positive: bool,
) -> Option<Pattern> {
    let series = stats::weekly_adherence_series(samples, now, config.min_trend_weeks);
    if series.len() < config.min_trend_weeks {
        return None;
    }
    let slope = stats::linear_slope(&series);
    let clears = if wants_positive {
        slope >= config.trend_slope_threshold
    } else {
        slope <= -config.trend_slope_threshold
    };
    if !clears {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let confidence = (series.len() as f64 / 10.0).min(1.0);
    let direction = if wants_positive { "improving" } else { "slipping" };

    Some(Pattern {
        id: PatternId::new(),
        med_id: med_id.clone(),
        kind,
        confidence,
        window_start: now - chrono::Duration::weeks(config.min_trend_weeks as i64),
        window_end: now,
        description: format!("adherence has been {direction} over the last {} weeks", series.len()),
        parameters: json!({
            "weekly_adherence": series,
            "slope": slope,
        }),
    })
}

/// Linear-regression slope of weekly adherence rate clearing the positive
/// threshold.
#[must_use]
pub fn adherence_trend_up(
    med_id: &MedId,
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    config: &CoachingConfig,
) -> Option<Pattern> {
    trend(med_id, samples, now, config, PatternKind::AdherenceTrendUp, true)
}

/// Linear-regression slope of weekly adherence rate clearing the negative
/// threshold.
#[must_use]
pub fn adherence_trend_down(
    med_id: &MedId,
    samples: &[AdherenceSample],
    now: DateTime<Utc>,
    config: &CoachingConfig,
) -> Option<Pattern> {
    trend(med_id, samples, now, config, PatternKind::AdherenceTrendDown, false)
}

/// Built directly from `Event::MedicationQuantityLow` rather than from the
/// adherence ring — there is no "sample history" for a quantity reading,
/// just the latest one.
#[must_use]
pub fn quantity_low(med_id: &MedId, days_remaining: f64, detected_at: DateTime<Utc>) -> Pattern {
    Pattern {
        id: PatternId::new(),
        med_id: med_id.clone(),
        kind: PatternKind::QuantityLow,
        confidence: 1.0,
        window_start: detected_at,
        window_end: detected_at,
        description: format!("about {days_remaining:.1} days of supply remaining"),
        parameters: json!({ "days_remaining": days_remaining }),
    }
}

/// Built directly from a single `AdherenceRecorded` event carrying
/// `AdherenceKind::Missed`, not from the weekday-aggregate ring — unlike
/// [`miss_on_weekday`] this needs no sample history or threshold, so a lone
/// missed dose still surfaces a pattern.
#[must_use]
pub fn missed_dose(med_id: &MedId, scheduled_time: DateTime<Utc>, detected_at: DateTime<Utc>) -> Pattern {
    Pattern {
        id: PatternId::new(),
        med_id: med_id.clone(),
        kind: PatternKind::MissedDose,
        confidence: 1.0,
        window_start: scheduled_time,
        window_end: detected_at,
        description: "a scheduled dose was missed".to_owned(),
        parameters: json!({ "scheduled_time": scheduled_time }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kg_core::AdherenceKind;

    fn med_id() -> MedId {
        MedId::new()
    }

    fn sample(kind: AdherenceKind, scheduled_time: DateTime<Utc>, minutes_late: Option<i64>) -> AdherenceSample {
        AdherenceSample {
            kind,
            scheduled_time,
            minutes_late,
            recorded_at: scheduled_time,
        }
    }

    #[test]
    fn late_on_weekday_needs_threshold_and_samples() {
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(); // a Monday
        let config = CoachingConfig::default();
        let med = med_id();

        // Three late Mondays, below min_samples of 4 — shouldn't fire yet.
        let samples: Vec<_> = (1..=3)
            .map(|w| sample(AdherenceKind::Late, now - chrono::Duration::weeks(w), Some(20)))
            .collect();
        assert!(late_on_weekday(&med, &samples, now, &config).is_none());

        let mut samples = samples;
        samples.push(sample(AdherenceKind::Late, now - chrono::Duration::weeks(4), Some(25)));
        let pattern = late_on_weekday(&med, &samples, now, &config).expect("threshold cleared");
        assert_eq!(pattern.kind, PatternKind::LateOnWeekday);
        assert_eq!(pattern.parameters["weekday"], "monday");
    }

    #[test]
    fn missed_dose_always_fires_with_full_confidence() {
        let scheduled = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        let pattern = missed_dose(&med_id(), scheduled, scheduled + chrono::Duration::minutes(30));
        assert_eq!(pattern.kind, PatternKind::MissedDose);
        assert!((pattern.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quantity_low_always_fires_with_full_confidence() {
        let pattern = quantity_low(&med_id(), 2.5, Utc::now());
        assert_eq!(pattern.kind, PatternKind::QuantityLow);
        assert!((pattern.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn adherence_trend_down_fires_on_declining_series() {
        let now = Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap();
        let config = CoachingConfig::default();
        let med = med_id();

        let mut samples = Vec::new();
        for week in 0..4i64 {
            let taken_count = 7 - week; // adherence declines each week
            for day in 0..7 {
                let scheduled = now - chrono::Duration::weeks(3 - week) - chrono::Duration::days(day - 7);
                let kind = if day < taken_count {
                    AdherenceKind::Taken
                } else {
                    AdherenceKind::Missed
                };
                samples.push(sample(kind, scheduled, Some(0)));
            }
        }

        let pattern = adherence_trend_down(&med, &samples, now, &config);
        assert!(pattern.is_some());
    }
}
