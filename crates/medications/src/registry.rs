use std::sync::Arc;

use chrono::Utc;
use kg_bus::{Event, EventBus};
use kg_coordinator::Coordinator;
use kg_core::{parse_schedule, MedId, Medication};
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::info;

use crate::error::MedicationError;
use crate::extractor::{AsyncExtractor, ExtractedDraft};

/// CRUD over medications, plus the OCR extraction path. Owns the
/// `Medication` row; delegates reminder/habit lifecycle to the
/// coordinator rather than touching either store directly.
pub struct MedicationRegistry {
    state: Arc<dyn StateStore>,
    coordinator: Arc<Coordinator>,
    bus: Arc<EventBus>,
    extractor: Arc<dyn AsyncExtractor>,
}

impl MedicationRegistry {
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        coordinator: Arc<Coordinator>,
        bus: Arc<EventBus>,
        extractor: Arc<dyn AsyncExtractor>,
    ) -> Self {
        Self {
            state,
            coordinator,
            bus,
            extractor,
        }
    }

    fn key(id: &MedId) -> StateKey {
        StateKey::new(KeyKind::Medication, id.as_str())
    }

    async fn load(&self, id: &MedId) -> Result<Medication, MedicationError> {
        let raw = self
            .state
            .get(&Self::key(id))
            .await?
            .ok_or_else(|| MedicationError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn persist(&self, med: &Medication) -> Result<(), MedicationError> {
        let raw = serde_json::to_string(med)?;
        self.state.set(&Self::key(&med.id), &raw, None).await?;
        Ok(())
    }

    pub async fn get(&self, id: &MedId) -> Result<Medication, MedicationError> {
        self.load(id).await
    }

    /// All medications, unordered. Used by the gateway's list endpoint and
    /// by the pattern engine's scan.
    pub async fn list(&self) -> Result<Vec<Medication>, MedicationError> {
        let mut meds = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::Medication).await? {
            if let Ok(med) = serde_json::from_str::<Medication>(&value) {
                meds.push(med);
            }
        }
        Ok(meds)
    }

    /// Create a medication: parses its schedule, persists the row, then
    /// has the coordinator provision a habit (if needed) and the initial
    /// `scheduled` reminder chain.
    pub async fn create(&self, mut med: Medication) -> Result<Medication, MedicationError> {
        let spec = parse_schedule(&med.schedule_raw, &med.timezone);
        if spec.is_fallback {
            med.schedule_diagnostic = spec.diagnostics.first().map(|d| d.message.clone());
        }
        self.persist(&med).await?;

        self.coordinator
            .provision_reminders(&mut med, &spec.firings, Utc::now())
            .await?;
        self.persist(&med).await?;

        self.bus.publish(Event::MedicationAdded {
            med_id: med.id.clone(),
            added_at: med.created_at,
        });
        info!(med_id = %med.id, "medication created");
        Ok(med)
    }

    /// Apply `mutate` to the stored medication. If it changes the schedule
    /// or timezone, the active reminder chain is replaced; the linked habit
    /// is preserved either way.
    pub async fn update(
        &self,
        id: &MedId,
        mutate: impl FnOnce(&mut Medication),
    ) -> Result<Medication, MedicationError> {
        let mut med = self.load(id).await?;
        let old_schedule_raw = med.schedule_raw.clone();
        let old_timezone = med.timezone.clone();

        mutate(&mut med);

        let schedule_changed = med.schedule_raw != old_schedule_raw || med.timezone != old_timezone;
        let spec = parse_schedule(&med.schedule_raw, &med.timezone);
        med.schedule_diagnostic = spec.is_fallback.then(|| {
            spec.diagnostics
                .first()
                .map(|d| d.message.clone())
                .unwrap_or_default()
        });

        if schedule_changed {
            self.coordinator
                .reprovision_reminders(&mut med, &spec.firings, Utc::now())
                .await?;
        }
        self.persist(&med).await?;

        self.bus.publish(Event::MedicationUpdated {
            med_id: med.id.clone(),
            updated_at: Utc::now(),
        });
        Ok(med)
    }

    /// Delete a medication: cascades its reminders (and medication-owned
    /// habit) via the coordinator, then removes the row itself.
    pub async fn delete(&self, id: &MedId) -> Result<(), MedicationError> {
        self.coordinator.decommission(id).await?;
        self.state.delete(&Self::key(id)).await?;
        self.bus.publish(Event::MedicationDeleted {
            med_id: id.clone(),
            deleted_at: Utc::now(),
        });
        Ok(())
    }

    /// Post a prescription label photo to the extraction collaborator and
    /// persist whatever draft comes back, flagging low-confidence fields.
    /// A failed extraction still returns a persisted, mostly-empty draft
    /// rather than an error, so the user always has a row to complete.
    pub async fn extract(&self, image_bytes: &[u8], content_type: &str) -> Result<Medication, MedicationError> {
        let draft = match self.extractor.extract(image_bytes, content_type).await {
            Ok(draft) => draft,
            Err(err) => {
                tracing::warn!(%err, "prescription extraction failed, falling back to empty draft");
                ExtractedDraft {
                    low_confidence_fields: vec![
                        "name".to_owned(),
                        "dosage".to_owned(),
                        "schedule_raw".to_owned(),
                    ],
                    ..ExtractedDraft::default()
                }
            }
        };

        let mut med = Medication::new(
            draft.name.unwrap_or_default(),
            draft.dosage.unwrap_or_default(),
            0,
            draft.schedule_raw.unwrap_or_default(),
            "UTC",
        );
        if let Some(prescriber) = draft.prescriber {
            med = med.with_prescriber(prescriber);
        }
        if !draft.low_confidence_fields.is_empty() {
            med.schedule_diagnostic = Some(format!(
                "needs review: {}",
                draft.low_confidence_fields.join(", ")
            ));
        }
        self.persist(&med).await?;
        Ok(med)
    }
}

#[cfg(test)]
mod tests {
    use kg_habits::HabitStore;
    use kg_reminders::ReminderStore;
    use kg_state_memory::MemoryStateStore;

    use crate::extractor::NoopExtractor;

    use super::*;

    fn registry() -> Arc<MedicationRegistry> {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
        let habits = Arc::new(HabitStore::new(Arc::clone(&state)));
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&state),
            reminders,
            habits,
            bus.clone(),
            kg_coordinator::CoordinatorConfig::default(),
        ));
        Arc::new(MedicationRegistry::new(
            state,
            coordinator,
            bus,
            Arc::new(NoopExtractor),
        ))
    }

    #[tokio::test]
    async fn create_provisions_habit_and_reminder() {
        let registry = registry();
        let med = Medication::new("Lisinopril", "10mg", 30, "daily at 08:00", "UTC");
        let created = registry.create(med).await.unwrap();
        assert!(created.habit_id.is_some());
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let registry = registry();
        let med = Medication::new("Lisinopril", "10mg", 30, "daily at 08:00", "UTC");
        let created = registry.create(med).await.unwrap();
        registry.delete(&created.id).await.unwrap();
        assert!(registry.get(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn update_preserves_habit_across_schedule_change() {
        let registry = registry();
        let med = Medication::new("Lisinopril", "10mg", 30, "daily at 08:00", "UTC");
        let created = registry.create(med).await.unwrap();
        let habit_before = created.habit_id.clone();

        let updated = registry
            .update(&created.id, |m| m.schedule_raw = "daily at 20:00".to_owned())
            .await
            .unwrap();
        assert_eq!(updated.habit_id, habit_before);
    }

    #[tokio::test]
    async fn extract_falls_back_to_draft_on_extractor_failure() {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let reminders = Arc::new(ReminderStore::new(Arc::clone(&state)));
        let habits = Arc::new(HabitStore::new(Arc::clone(&state)));
        let bus = Arc::new(EventBus::new());
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&state),
            reminders,
            habits,
            bus.clone(),
            kg_coordinator::CoordinatorConfig::default(),
        ));

        #[derive(Debug)]
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl AsyncExtractor for AlwaysFails {
            async fn extract(
                &self,
                _image_bytes: &[u8],
                _content_type: &str,
            ) -> Result<ExtractedDraft, crate::error::ExtractionError> {
                Err(crate::error::ExtractionError::Timeout(20))
            }
        }

        let registry = MedicationRegistry::new(state, coordinator, bus, Arc::new(AlwaysFails));
        let med = registry.extract(&[], "image/png").await.unwrap();
        assert!(med.schedule_diagnostic.is_some());
    }
}
