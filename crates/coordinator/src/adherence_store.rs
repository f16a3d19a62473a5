use std::sync::Arc;

use kg_core::{AdherenceEvent, MedId, ReminderId};
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::warn;

use crate::error::CoordinatorError;

/// Append-only log of adherence outcomes. Never mutated after insert; the
/// pattern engine reads it to reconstruct per-medication statistics.
pub struct AdherenceEventStore {
    state: Arc<dyn StateStore>,
}

impl AdherenceEventStore {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    pub async fn append(&self, event: AdherenceEvent) -> Result<AdherenceEvent, CoordinatorError> {
        let key = StateKey::new(KeyKind::AdherenceEvent, event.id.as_str());
        let raw = serde_json::to_string(&event)?;
        self.state.set(&key, &raw, None).await?;
        Ok(event)
    }

    /// All adherence events recorded for a medication, unordered.
    pub async fn list_for_medication(&self, med_id: &MedId) -> Result<Vec<AdherenceEvent>, CoordinatorError> {
        let mut events = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::AdherenceEvent).await? {
            match serde_json::from_str::<AdherenceEvent>(&value) {
                Ok(event) if event.med_id.as_ref() == Some(med_id) => events.push(event),
                Ok(_) => {}
                Err(_) => warn!("skipping unparseable adherence event"),
            }
        }
        Ok(events)
    }

    /// All adherence events recorded for a specific reminder, unordered.
    /// Used to check testable-property invariants (exactly one `taken`/`late`
    /// event per confirmed reminder, exactly one `missed` per missed one).
    pub async fn list_for_reminder(&self, reminder_id: &ReminderId) -> Result<Vec<AdherenceEvent>, CoordinatorError> {
        let mut events = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::AdherenceEvent).await? {
            match serde_json::from_str::<AdherenceEvent>(&value) {
                Ok(event) if &event.reminder_id == reminder_id => events.push(event),
                Ok(_) => {}
                Err(_) => warn!("skipping unparseable adherence event"),
            }
        }
        Ok(events)
    }
}
