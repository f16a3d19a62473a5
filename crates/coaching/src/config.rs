use chrono::NaiveTime;

/// Tunables for the pattern detectors and coaching message cooldowns.
#[derive(Debug, Clone)]
pub struct CoachingConfig {
    /// Size of the rolling per-medication adherence-event ring.
    pub ring_size: usize,
    /// Default per-`(kind, med_id)` message cooldown.
    pub default_cooldown: chrono::Duration,
    /// `quantity_low` gets a longer cooldown since restocking takes days,
    /// not hours.
    pub quantity_low_cooldown: chrono::Duration,
    /// Quiet-hours window (local time); messages generated inside this
    /// window are deferred to its end.
    pub quiet_hours_start: NaiveTime,
    pub quiet_hours_end: NaiveTime,
    /// IANA timezone the quiet-hours window is interpreted in. Kilo
    /// Guardian is a single-user deployment and the coaching engine has no
    /// per-medication timezone of its own (it deliberately has no
    /// dependency on `kg-medications`), so this is the one household clock
    /// every quiet-hours computation uses.
    pub timezone: String,
    /// Ceiling a `not_helpful`/`dismissed`-doubled cooldown can reach.
    pub max_cooldown: chrono::Duration,
    /// Minimum samples a weekday detector needs before it can fire.
    pub min_samples: u32,
    /// Mean minutes-late threshold for `late_on_weekday`.
    pub late_threshold_minutes: i64,
    /// Miss-rate threshold for `miss_on_weekday`.
    pub miss_rate_threshold: f64,
    /// Minimum weekly adherence samples for a trend detector to fire.
    pub min_trend_weeks: usize,
    /// Slope magnitude threshold for `adherence_trend_up/down`.
    pub trend_slope_threshold: f64,
}

impl Default for CoachingConfig {
    fn default() -> Self {
        Self {
            ring_size: 60,
            default_cooldown: chrono::Duration::hours(4),
            quantity_low_cooldown: chrono::Duration::hours(24),
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            quiet_hours_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            timezone: "UTC".to_owned(),
            max_cooldown: chrono::Duration::days(7),
            min_samples: 4,
            late_threshold_minutes: 15,
            miss_rate_threshold: 0.3,
            min_trend_weeks: 3,
            trend_slope_threshold: 0.05,
        }
    }
}
