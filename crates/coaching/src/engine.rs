use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kg_bus::{BusError, Event, EventBus, EventSink};
use kg_core::{CoachingFeedback, CoachingMessage, CoachingMessageId, MedId, Pattern, PatternKind};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::CoachingConfig;
use crate::cooldown;
use crate::detectors;
use crate::error::CoachingError;
use crate::stats::AdherenceSample;
use crate::store::CoachingStore;
use crate::templates;

/// Subscribes to adherence/quantity/medication events, keeps a rolling
/// per-medication sample ring, runs the pattern detectors on every
/// adherence update, and turns detected patterns into coaching messages
/// subject to cooldown and quiet hours.
pub struct CoachingEngine {
    store: CoachingStore,
    bus: Arc<EventBus>,
    config: CoachingConfig,
    rings: RwLock<HashMap<MedId, VecDeque<AdherenceSample>>>,
}

impl CoachingEngine {
    #[must_use]
    pub fn new(store: CoachingStore, bus: Arc<EventBus>, config: CoachingConfig) -> Self {
        Self {
            store,
            bus,
            config,
            rings: RwLock::new(HashMap::new()),
        }
    }

    fn push_sample(&self, med_id: &MedId, sample: AdherenceSample) {
        let mut rings = self.rings.write();
        let ring = rings.entry(med_id.clone()).or_default();
        ring.push_back(sample);
        while ring.len() > self.config.ring_size {
            ring.pop_front();
        }
    }

    fn samples_for(&self, med_id: &MedId) -> Vec<AdherenceSample> {
        self.rings
            .read()
            .get(med_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn handle_adherence_recorded(
        &self,
        med_id: Option<&MedId>,
        sample: AdherenceSample,
    ) -> Result<(), CoachingError> {
        let Some(med_id) = med_id else {
            return Ok(());
        };
        let scheduled_time = sample.scheduled_time;
        let missed = sample.kind == kg_core::AdherenceKind::Missed;
        self.push_sample(med_id, sample);
        let samples = self.samples_for(med_id);
        let now = Utc::now();

        let detected = [
            detectors::late_on_weekday(med_id, &samples, now, &self.config),
            detectors::miss_on_weekday(med_id, &samples, now, &self.config),
            detectors::adherence_trend_up(med_id, &samples, now, &self.config),
            detectors::adherence_trend_down(med_id, &samples, now, &self.config),
        ];

        for pattern in detected.into_iter().flatten() {
            self.apply_pattern(pattern).await?;
        }

        if missed {
            self.apply_pattern(detectors::missed_dose(med_id, scheduled_time, now)).await?;
        }
        Ok(())
    }

    async fn handle_quantity_low(
        &self,
        med_id: &MedId,
        days_remaining: f64,
        detected_at: chrono::DateTime<Utc>,
    ) -> Result<(), CoachingError> {
        let pattern = detectors::quantity_low(med_id, days_remaining, detected_at);
        self.apply_pattern(pattern).await
    }

    /// Persists the detected pattern (superseding any prior one of the
    /// same kind), then — if cooldown and quiet hours allow it —
    /// generates and persists a coaching message and publishes
    /// `CoachingMessageReady`.
    async fn apply_pattern(&self, pattern: Pattern) -> Result<(), CoachingError> {
        let kind_name = pattern_kind_name(pattern.kind);
        self.store.put_pattern(&pattern).await?;

        let now = Utc::now();
        let last_sent = self.store.last_sent(Some(&pattern.med_id), kind_name).await?;
        let mut cooldown = cooldown::base_cooldown(pattern.kind, &self.config);
        if let Some(feedback) = self.store.last_feedback(Some(&pattern.med_id), kind_name).await? {
            cooldown = cooldown::adjust_cooldown(cooldown, feedback, &self.config);
        }
        if !cooldown::cooldown_elapsed(last_sent, now, cooldown) {
            debug!(med_id = %pattern.med_id, kind = kind_name, "coaching message suppressed by cooldown");
            return Ok(());
        }

        let not_before = cooldown::not_before(now, &self.config)?;
        let message = CoachingMessage {
            id: CoachingMessageId::new(),
            user: "household".to_owned(),
            med_id: Some(pattern.med_id.clone()),
            kind: kind_name.to_owned(),
            text: templates::render(&pattern),
            generated_at: now,
            delivered_at: None,
            read_at: None,
            feedback: None,
            not_before,
        };
        self.store.put_message(&message).await?;
        self.bus.publish(Event::CoachingMessageReady {
            med_id: message.med_id.clone(),
            message_id: message.id.clone(),
            ready_at: now,
        });
        Ok(())
    }

    /// Messages ready to be shown right now, oldest first.
    pub async fn pending_messages(&self) -> Result<Vec<CoachingMessage>, CoachingError> {
        self.store.list_pending(Utc::now()).await
    }

    /// Marks a message delivered (pulled by a client) at the current time.
    pub async fn mark_delivered(&self, id: &CoachingMessageId) -> Result<(), CoachingError> {
        self.store.mark_delivered(id, Utc::now()).await
    }

    /// Detected patterns for a medication, unordered. Surfaced by the
    /// gateway's patterns endpoint.
    pub async fn list_patterns(&self, med_id: &MedId) -> Result<Vec<Pattern>, CoachingError> {
        self.store.list_patterns_for_medication(med_id).await
    }

    /// Records user feedback on a delivered message. Negative feedback
    /// doubles that message kind's cooldown the next time it's checked.
    pub async fn record_feedback(
        &self,
        id: &CoachingMessageId,
        feedback: CoachingFeedback,
    ) -> Result<(), CoachingError> {
        self.store.record_feedback(id, feedback).await?;
        Ok(())
    }
}

fn pattern_kind_name(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::LateOnWeekday => "late_on_weekday",
        PatternKind::MissOnWeekday => "miss_on_weekday",
        PatternKind::AdherenceTrendUp => "adherence_trend_up",
        PatternKind::AdherenceTrendDown => "adherence_trend_down",
        PatternKind::QuantityLow => "quantity_low",
        PatternKind::MissedDose => "missed_dose",
    }
}

#[async_trait]
impl EventSink for CoachingEngine {
    fn name(&self) -> &str {
        "coaching-engine"
    }

    async fn handle(&self, event: &Event) -> Result<(), BusError> {
        let result = match event {
            Event::AdherenceRecorded {
                med_id,
                kind,
                scheduled_time,
                minutes_late,
                recorded_at,
                ..
            } => {
                let sample = AdherenceSample {
                    kind: *kind,
                    scheduled_time: *scheduled_time,
                    minutes_late: *minutes_late,
                    recorded_at: *recorded_at,
                };
                self.handle_adherence_recorded(med_id.as_ref(), sample).await
            }
            Event::MedicationQuantityLow {
                med_id,
                days_remaining,
                detected_at,
            } => self.handle_quantity_low(med_id, *days_remaining, *detected_at).await,
            Event::MedicationAdded { med_id, .. } => {
                self.rings.write().entry(med_id.clone()).or_default();
                Ok(())
            }
            _ => Ok(()),
        };

        result.map_err(|err| {
            warn!(error = %err, "coaching engine failed to process event");
            BusError::SinkRejected {
                sink: self.name().to_owned(),
                reason: err.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_core::AdherenceKind;
    use kg_state_memory::MemoryStateStore;

    fn engine() -> CoachingEngine {
        let store = CoachingStore::new(Arc::new(MemoryStateStore::new()));
        CoachingEngine::new(store, Arc::new(EventBus::new()), CoachingConfig::default())
    }

    #[tokio::test]
    async fn medication_added_seeds_an_empty_ring() {
        let engine = engine();
        let med_id = MedId::new();
        engine
            .handle(&Event::MedicationAdded {
                med_id: med_id.clone(),
                added_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(engine.rings.read().contains_key(&med_id));
    }

    #[tokio::test]
    async fn quantity_low_event_produces_a_pending_message() {
        let engine = engine();
        let med_id = MedId::new();
        engine
            .handle(&Event::MedicationQuantityLow {
                med_id: med_id.clone(),
                days_remaining: 1.5,
                detected_at: Utc::now(),
            })
            .await
            .unwrap();

        let pending = engine.pending_messages().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, "quantity_low");
    }

    #[tokio::test]
    async fn quantity_low_is_suppressed_by_cooldown_on_repeat() {
        let engine = engine();
        let med_id = MedId::new();
        let event = Event::MedicationQuantityLow {
            med_id: med_id.clone(),
            days_remaining: 1.5,
            detected_at: Utc::now(),
        };
        engine.handle(&event).await.unwrap();
        engine.handle(&event).await.unwrap();

        let pending = engine.pending_messages().await.unwrap();
        assert_eq!(pending.len(), 1, "second detection should be suppressed by cooldown");
    }

    #[tokio::test]
    async fn a_single_missed_dose_produces_a_coaching_message() {
        let engine = engine();
        let med_id = MedId::new();
        engine
            .handle(&Event::AdherenceRecorded {
                reminder_id: kg_core::ReminderId::new(),
                med_id: Some(med_id),
                kind: AdherenceKind::Missed,
                scheduled_time: Utc::now(),
                minutes_late: None,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();

        let pending = engine.pending_messages().await.unwrap();
        assert!(
            pending.iter().any(|m| m.kind == "missed_dose"),
            "a lone missed dose should still produce a missed_dose message"
        );
    }

    #[tokio::test]
    async fn negative_feedback_lengthens_the_next_cooldown() {
        let engine = engine();
        let med_id = MedId::new();
        let event = |scheduled: chrono::DateTime<Utc>| Event::AdherenceRecorded {
            reminder_id: kg_core::ReminderId::new(),
            med_id: Some(med_id.clone()),
            kind: AdherenceKind::Missed,
            scheduled_time: scheduled,
            minutes_late: None,
            recorded_at: scheduled,
        };

        engine.handle(&event(Utc::now())).await.unwrap();
        let pending = engine.pending_messages().await.unwrap();
        let message = pending.iter().find(|m| m.kind == "missed_dose").unwrap().clone();
        engine.record_feedback(&message.id, CoachingFeedback::NotHelpful).await.unwrap();

        // Within the default cooldown window, a second miss should still be suppressed
        // even though feedback lengthened it further.
        engine.handle(&event(Utc::now())).await.unwrap();
        let pending = engine.pending_messages().await.unwrap();
        assert_eq!(
            pending.iter().filter(|m| m.kind == "missed_dose").count(),
            1,
            "repeat miss inside the lengthened cooldown should not send another message"
        );
    }

    #[tokio::test]
    async fn adherence_recorded_without_med_id_is_ignored() {
        let engine = engine();
        engine
            .handle(&Event::AdherenceRecorded {
                reminder_id: kg_core::ReminderId::new(),
                med_id: None,
                kind: AdherenceKind::Taken,
                scheduled_time: Utc::now(),
                minutes_late: None,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(engine.rings.read().is_empty());
    }
}
