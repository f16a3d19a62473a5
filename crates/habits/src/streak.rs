use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use kg_core::{Habit, HabitCompletion, HabitFrequency};

/// Map a calendar date onto the period index used for streak-walking at a
/// given frequency: the day number for daily habits, the ISO week number
/// (year-scoped) for weekly, the year/month ordinal for monthly.
fn period_index(date: NaiveDate, frequency: HabitFrequency) -> i64 {
    match frequency {
        HabitFrequency::Daily => date.num_days_from_ce().into(),
        HabitFrequency::Weekly => {
            let week = date.iso_week();
            i64::from(week.year()) * 53 + i64::from(week.week())
        }
        HabitFrequency::Monthly => i64::from(date.year()) * 12 + i64::from(date.month()),
    }
}

/// Walk backwards from `today`'s period through consecutive completed
/// periods, counting how many are unbroken.
fn walk_streak(periods: &BTreeSet<i64>, current_period: i64) -> u32 {
    let mut streak = 0u32;
    let mut period = current_period;
    while periods.contains(&period) {
        streak += 1;
        period -= 1;
    }
    streak
}

/// Recompute `current_streak` from a habit's full completion history as of
/// `today`. Does not touch `longest_streak` or `total_completions`; callers
/// fold those in separately (`longest = max(longest, current)`,
/// `total += 1` per completion recorded).
#[must_use]
pub fn current_streak(completions: &[HabitCompletion], frequency: HabitFrequency, today: NaiveDate) -> u32 {
    let periods: BTreeSet<i64> = completions
        .iter()
        .map(|c| period_index(c.completion_date, frequency))
        .collect();
    walk_streak(&periods, period_index(today, frequency))
}

/// Fold a newly recorded completion into a habit's cached streak counters.
pub fn apply_completion(habit: &mut Habit, completions: &[HabitCompletion], today: NaiveDate) {
    habit.current_streak = current_streak(completions, habit.frequency, today);
    habit.longest_streak = habit.longest_streak.max(habit.current_streak);
    habit.total_completions += 1;
}

/// Adherence rate over a trailing window of `window_days`, as of `today`:
/// distinct completed periods in the window divided by expected periods in
/// the window for this habit's frequency.
#[must_use]
pub fn adherence_rate(
    completions: &[HabitCompletion],
    frequency: HabitFrequency,
    today: NaiveDate,
    window_days: u32,
) -> f64 {
    if window_days == 0 {
        return 0.0;
    }
    let window_start = today - chrono::Duration::days(i64::from(window_days) - 1);

    let completed_periods: BTreeSet<i64> = completions
        .iter()
        .filter(|c| c.completion_date >= window_start && c.completion_date <= today)
        .map(|c| period_index(c.completion_date, frequency))
        .collect();

    let expected = match frequency {
        HabitFrequency::Daily => f64::from(window_days),
        HabitFrequency::Weekly => f64::from(window_days) / 7.0,
        HabitFrequency::Monthly => f64::from(window_days) / 30.0,
    };
    if expected <= 0.0 {
        return 0.0;
    }

    (completed_periods.len() as f64 / expected).min(1.0)
}

#[cfg(test)]
mod tests {
    use kg_core::{HabitCompletionId, ReminderId};

    use super::*;

    fn completion(date: NaiveDate) -> HabitCompletion {
        HabitCompletion {
            id: HabitCompletionId::new(),
            habit_id: kg_core::HabitId::new(),
            completion_date: date,
            count: 1,
            reminder_id: None::<ReminderId>,
        }
    }

    #[test]
    fn daily_streak_breaks_on_gap() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let completions = vec![
            completion(today),
            completion(today - chrono::Duration::days(1)),
            completion(today - chrono::Duration::days(2)),
            // gap at day 3
            completion(today - chrono::Duration::days(4)),
        ];
        assert_eq!(current_streak(&completions, HabitFrequency::Daily, today), 3);
    }

    #[test]
    fn daily_streak_zero_if_today_missing() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let completions = vec![completion(today - chrono::Duration::days(1))];
        assert_eq!(current_streak(&completions, HabitFrequency::Daily, today), 0);
    }

    #[test]
    fn weekly_streak_counts_one_per_iso_week() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap(); // Tuesday
        let this_week = completion(today);
        let last_week = completion(today - chrono::Duration::days(7));
        let completions = vec![this_week, last_week];
        assert_eq!(current_streak(&completions, HabitFrequency::Weekly, today), 2);
    }

    #[test]
    fn adherence_rate_is_capped_at_one() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let completions: Vec<_> = (0..10)
            .map(|d| completion(today - chrono::Duration::days(d)))
            .collect();
        let rate = adherence_rate(&completions, HabitFrequency::Daily, today, 7);
        assert!((rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn adherence_rate_reflects_partial_completion() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let completions = vec![completion(today), completion(today - chrono::Duration::days(2))];
        let rate = adherence_rate(&completions, HabitFrequency::Daily, today, 4);
        assert!((rate - 0.5).abs() < 1e-9);
    }
}
