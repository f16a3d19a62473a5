use std::sync::Arc;

use chrono::{DateTime, Utc};
use kg_core::{CoachingFeedback, CoachingMessage, CoachingMessageId, MedId, Pattern, PatternId, PatternKind};
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::warn;

use crate::error::CoachingError;

/// Persists detected patterns and generated coaching messages.
///
/// Patterns supersede by `(med_id, kind)`: a fresh detector run for the
/// same medication and pattern kind overwrites the previous row rather
/// than appending, since only the latest read on a given pattern matters.
/// Coaching messages are append-only, mirroring `kg-coordinator`'s
/// `AdherenceEventStore`.
pub struct CoachingStore {
    state: Arc<dyn StateStore>,
}

fn pattern_key(med_id: &MedId, kind: PatternKind) -> String {
    format!("{med_id}:{kind:?}")
}

impl CoachingStore {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    /// Writes a pattern, superseding any prior pattern of the same kind for
    /// the same medication.
    pub async fn put_pattern(&self, pattern: &Pattern) -> Result<(), CoachingError> {
        let key = StateKey::new(KeyKind::Pattern, pattern_key(&pattern.med_id, pattern.kind));
        let raw = serde_json::to_string(pattern)?;
        self.state.set(&key, &raw, None).await?;
        Ok(())
    }

    pub async fn get_pattern(&self, med_id: &MedId, kind: PatternKind) -> Result<Option<Pattern>, CoachingError> {
        let key = StateKey::new(KeyKind::Pattern, pattern_key(med_id, kind));
        match self.state.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list_patterns_for_medication(&self, med_id: &MedId) -> Result<Vec<Pattern>, CoachingError> {
        let mut patterns = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::Pattern).await? {
            match serde_json::from_str::<Pattern>(&value) {
                Ok(pattern) if &pattern.med_id == med_id => patterns.push(pattern),
                Ok(_) => {}
                Err(_) => warn!("skipping unparseable pattern"),
            }
        }
        Ok(patterns)
    }

    pub async fn put_message(&self, message: &CoachingMessage) -> Result<(), CoachingError> {
        let key = StateKey::new(KeyKind::CoachingMessage, message.id.as_str());
        let raw = serde_json::to_string(message)?;
        self.state.set(&key, &raw, None).await?;
        Ok(())
    }

    pub async fn get_message(&self, id: &CoachingMessageId) -> Result<Option<CoachingMessage>, CoachingError> {
        let key = StateKey::new(KeyKind::CoachingMessage, id.as_str());
        match self.state.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Messages that are ready to show (`not_before` has passed) and
    /// haven't been delivered yet, oldest first.
    pub async fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<CoachingMessage>, CoachingError> {
        let mut messages = self.list_all().await?;
        messages.retain(|m| m.delivered_at.is_none() && m.not_before <= now);
        messages.sort_by_key(|m| m.generated_at);
        Ok(messages)
    }

    async fn list_all(&self) -> Result<Vec<CoachingMessage>, CoachingError> {
        let mut messages = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::CoachingMessage).await? {
            match serde_json::from_str::<CoachingMessage>(&value) {
                Ok(message) => messages.push(message),
                Err(_) => warn!("skipping unparseable coaching message"),
            }
        }
        Ok(messages)
    }

    /// Most recent `generated_at` among messages of a given `kind` for a
    /// medication, used to check whether a cooldown has elapsed.
    pub async fn last_sent(&self, med_id: Option<&MedId>, kind: &str) -> Result<Option<DateTime<Utc>>, CoachingError> {
        let messages = self.list_all().await?;
        let last = messages
            .into_iter()
            .filter(|m| m.kind == kind && m.med_id.as_ref() == med_id)
            .map(|m| m.generated_at)
            .max();
        Ok(last)
    }

    /// Feedback recorded on the most recently generated message of a given
    /// `kind` for a medication, if any message of that kind has both been
    /// sent and received feedback. Used to adjust the next cooldown.
    pub async fn last_feedback(
        &self,
        med_id: Option<&MedId>,
        kind: &str,
    ) -> Result<Option<CoachingFeedback>, CoachingError> {
        let mut messages = self.list_all().await?;
        messages.retain(|m| m.kind == kind && m.med_id.as_ref() == med_id);
        messages.sort_by_key(|m| m.generated_at);
        Ok(messages.into_iter().rev().find_map(|m| m.feedback))
    }

    pub async fn mark_delivered(&self, id: &CoachingMessageId, delivered_at: DateTime<Utc>) -> Result<(), CoachingError> {
        let Some(mut message) = self.get_message(id).await? else {
            return Err(CoachingError::NotFound(id.as_str().to_owned()));
        };
        message.delivered_at = Some(delivered_at);
        self.put_message(&message).await
    }

    pub async fn record_feedback(&self, id: &CoachingMessageId, feedback: CoachingFeedback) -> Result<CoachingMessage, CoachingError> {
        let Some(mut message) = self.get_message(id).await? else {
            return Err(CoachingError::NotFound(id.as_str().to_owned()));
        };
        message.feedback = Some(feedback);
        self.put_message(&message).await?;
        Ok(message)
    }
}
