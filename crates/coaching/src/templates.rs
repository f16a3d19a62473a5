use kg_core::{Pattern, PatternKind};

/// Renders a coaching message body from a detected pattern.
///
/// Templates work purely off `Pattern`'s fields — the coaching engine has
/// no dependency on `kg-medications` and so doesn't know a medication's
/// display name. The gateway's presentation layer is responsible for
/// substituting the medication name in at render time (Kilo Guardian is
/// single-user, so the only consumer is the household's own device).
#[must_use]
pub fn render(pattern: &Pattern) -> String {
    match pattern.kind {
        PatternKind::LateOnWeekday => {
            let weekday = pattern.parameters["weekday"].as_str().unwrap_or("that day");
            let mean_minutes = pattern.parameters["mean_minutes_late"].as_f64().unwrap_or(0.0);
            format!(
                "This dose tends to run about {mean_minutes:.0} minutes late on {weekday}s. \
                 Want to try moving the reminder earlier on that day?"
            )
        }
        PatternKind::MissOnWeekday => {
            let weekday = pattern.parameters["weekday"].as_str().unwrap_or("that day");
            let rate = pattern.parameters["miss_rate"].as_f64().unwrap_or(0.0) * 100.0;
            format!(
                "About {rate:.0}% of doses scheduled on {weekday}s get missed. \
                 A second reminder later that day might help."
            )
        }
        PatternKind::AdherenceTrendUp => {
            "Adherence has been trending up over the last few weeks — nice work keeping this up.".to_owned()
        }
        PatternKind::AdherenceTrendDown => {
            "Adherence has been slipping over the last few weeks. \
             Is something about the current schedule not working?"
                .to_owned()
        }
        PatternKind::QuantityLow => {
            let days_remaining = pattern.parameters["days_remaining"].as_f64().unwrap_or(0.0);
            format!("About {days_remaining:.0} days of supply left — time to line up a refill.")
        }
        PatternKind::MissedDose => {
            "Looks like a dose got missed. Want a follow-up reminder later today?".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kg_core::{MedId, PatternId};
    use serde_json::json;

    fn pattern(kind: PatternKind, parameters: serde_json::Value) -> Pattern {
        Pattern {
            id: PatternId::new(),
            med_id: MedId::new(),
            kind,
            confidence: 0.8,
            window_start: Utc::now(),
            window_end: Utc::now(),
            description: String::new(),
            parameters,
        }
    }

    #[test]
    fn late_on_weekday_mentions_weekday_and_minutes() {
        let text = render(&pattern(
            PatternKind::LateOnWeekday,
            json!({ "weekday": "monday", "mean_minutes_late": 22.0 }),
        ));
        assert!(text.contains("monday"));
        assert!(text.contains("22"));
    }

    #[test]
    fn missed_dose_mentions_follow_up() {
        let text = render(&pattern(PatternKind::MissedDose, json!({})));
        assert!(text.contains("missed"));
    }

    #[test]
    fn quantity_low_mentions_days_remaining() {
        let text = render(&pattern(PatternKind::QuantityLow, json!({ "days_remaining": 3.0 })));
        assert!(text.contains('3'));
    }
}
