use std::sync::Arc;

use chrono::NaiveDate;
use kg_core::{Habit, HabitCompletion, HabitId, ReminderId};
use kg_state::{KeyKind, StateKey, StateStore};
use tracing::warn;

use crate::error::HabitError;
use crate::streak;

/// Append-only habit ledger: owns `Habit` rows and their `HabitCompletion`
/// children exclusively. Completions are unique on `(habit_id,
/// completion_date)`; a duplicate completion for the same day increments
/// `count` instead of creating a second row.
pub struct HabitStore {
    state: Arc<dyn StateStore>,
}

impl HabitStore {
    #[must_use]
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(id: &HabitId) -> StateKey {
        StateKey::new(KeyKind::Habit, id.as_str())
    }

    fn completion_key(habit_id: &HabitId, date: NaiveDate) -> StateKey {
        StateKey::new(KeyKind::HabitCompletion, format!("{habit_id}:{date}"))
    }

    async fn load(&self, id: &HabitId) -> Result<Habit, HabitError> {
        let raw = self
            .state
            .get(&Self::key(id))
            .await?
            .ok_or_else(|| HabitError::NotFound(id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn persist(&self, habit: &Habit) -> Result<(), HabitError> {
        let raw = serde_json::to_string(habit)?;
        self.state.set(&Self::key(&habit.id), &raw, None).await?;
        Ok(())
    }

    pub async fn create(&self, habit: Habit) -> Result<Habit, HabitError> {
        self.persist(&habit).await?;
        Ok(habit)
    }

    pub async fn get(&self, id: &HabitId) -> Result<Habit, HabitError> {
        self.load(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<Habit>, HabitError> {
        let mut habits = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::Habit).await? {
            match serde_json::from_str::<Habit>(&value) {
                Ok(habit) => habits.push(habit),
                Err(_) => warn!("skipping unparseable habit"),
            }
        }
        Ok(habits)
    }

    pub async fn update(&self, id: &HabitId, mutate: impl FnOnce(&mut Habit)) -> Result<Habit, HabitError> {
        let mut habit = self.load(id).await?;
        mutate(&mut habit);
        self.persist(&habit).await?;
        Ok(habit)
    }

    pub async fn delete(&self, id: &HabitId) -> Result<(), HabitError> {
        self.state.delete(&Self::key(id)).await?;
        for (completion_key, _) in self.state.scan_keys_by_kind(KeyKind::HabitCompletion).await? {
            if completion_key.starts_with(&format!("{id}:")) {
                self.state
                    .delete(&StateKey::new(KeyKind::HabitCompletion, completion_key))
                    .await?;
            }
        }
        Ok(())
    }

    /// All completions recorded for a habit, unordered.
    pub async fn list_completions(&self, habit_id: &HabitId) -> Result<Vec<HabitCompletion>, HabitError> {
        let mut completions = Vec::new();
        for (_, value) in self.state.scan_keys_by_kind(KeyKind::HabitCompletion).await? {
            match serde_json::from_str::<HabitCompletion>(&value) {
                Ok(completion) if &completion.habit_id == habit_id => completions.push(completion),
                Ok(_) => {}
                Err(_) => warn!("skipping unparseable habit completion"),
            }
        }
        Ok(completions)
    }

    /// Record a completion for `completion_date`, upserting the count if one
    /// already exists for that day, and fold the result into the habit's
    /// cached streak counters.
    pub async fn complete(
        &self,
        habit_id: &HabitId,
        completion_date: NaiveDate,
        reminder_id: Option<ReminderId>,
    ) -> Result<(Habit, HabitCompletion), HabitError> {
        let key = Self::completion_key(habit_id, completion_date);
        let completion = match self.state.get(&key).await? {
            Some(raw) => {
                let mut existing: HabitCompletion = serde_json::from_str(&raw)?;
                existing.count += 1;
                self.state
                    .set(&key, &serde_json::to_string(&existing)?, None)
                    .await?;
                existing
            }
            None => {
                let completion = HabitCompletion {
                    reminder_id,
                    ..HabitCompletion::new(habit_id.clone(), completion_date)
                };
                self.state
                    .set(&key, &serde_json::to_string(&completion)?, None)
                    .await?;
                completion
            }
        };

        let mut habit = self.load(habit_id).await?;
        let all_completions = self.list_completions(habit_id).await?;
        streak::apply_completion(&mut habit, &all_completions, completion_date);
        self.persist(&habit).await?;

        Ok((habit, completion))
    }

    pub async fn adherence_rate(
        &self,
        habit_id: &HabitId,
        today: NaiveDate,
        window_days: u32,
    ) -> Result<f64, HabitError> {
        let habit = self.load(habit_id).await?;
        let completions = self.list_completions(habit_id).await?;
        Ok(streak::adherence_rate(&completions, habit.frequency, today, window_days))
    }
}

#[cfg(test)]
mod tests {
    use kg_core::HabitFrequency;
    use kg_state_memory::MemoryStateStore;

    use super::*;

    fn store() -> HabitStore {
        HabitStore::new(Arc::new(MemoryStateStore::new()))
    }

    #[tokio::test]
    async fn complete_creates_then_increments_same_day() {
        let store = store();
        let habit = Habit::new("Walk", HabitFrequency::Daily);
        let id = habit.id.clone();
        store.create(habit).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let (habit, completion) = store.complete(&id, today, None).await.unwrap();
        assert_eq!(completion.count, 1);
        assert_eq!(habit.current_streak, 1);
        assert_eq!(habit.total_completions, 1);

        let (habit, completion) = store.complete(&id, today, None).await.unwrap();
        assert_eq!(completion.count, 2);
        assert_eq!(habit.current_streak, 1, "same-day repeat shouldn't double the streak");
        assert_eq!(habit.total_completions, 2);
    }

    #[tokio::test]
    async fn longest_streak_never_decreases() {
        let store = store();
        let habit = Habit::new("Walk", HabitFrequency::Daily);
        let id = habit.id.clone();
        store.create(habit).await.unwrap();

        let day0 = NaiveDate::from_ymd_opt(2026, 7, 20).unwrap();
        for offset in 0..5 {
            store.complete(&id, day0 + chrono::Duration::days(offset), None).await.unwrap();
        }
        // gap, streak resets, longest should hold at 5
        let (habit, _) = store
            .complete(&id, day0 + chrono::Duration::days(10), None)
            .await
            .unwrap();
        assert_eq!(habit.current_streak, 1);
        assert_eq!(habit.longest_streak, 5);
    }

    #[tokio::test]
    async fn update_mutates_and_persists() {
        let store = store();
        let habit = Habit::new("Walk", HabitFrequency::Daily);
        let id = habit.id.clone();
        store.create(habit).await.unwrap();

        let updated = store.update(&id, |h| h.name = "Run".to_owned()).await.unwrap();
        assert_eq!(updated.name, "Run");
        assert_eq!(store.get(&id).await.unwrap().name, "Run");
    }

    #[tokio::test]
    async fn list_all_returns_every_habit() {
        let store = store();
        store.create(Habit::new("Walk", HabitFrequency::Daily)).await.unwrap();
        store.create(Habit::new("Read", HabitFrequency::Daily)).await.unwrap();

        let habits = store.list_all().await.unwrap();
        assert_eq!(habits.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_habit_and_completions() {
        let store = store();
        let habit = Habit::new("Walk", HabitFrequency::Daily);
        let id = habit.id.clone();
        store.create(habit).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        store.complete(&id, today, None).await.unwrap();

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.is_err());
        assert!(store.list_completions(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adherence_rate_over_window() {
        let store = store();
        let habit = Habit::new("Walk", HabitFrequency::Daily);
        let id = habit.id.clone();
        store.create(habit).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        store.complete(&id, today, None).await.unwrap();
        store.complete(&id, today - chrono::Duration::days(2), None).await.unwrap();

        let rate = store.adherence_rate(&id, today, 4).await.unwrap();
        assert!((rate - 0.5).abs() < 1e-9);
    }
}
