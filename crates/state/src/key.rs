use serde::{Deserialize, Serialize};

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Medication,
    Reminder,
    Habit,
    HabitCompletion,
    AdherenceEvent,
    Pattern,
    CoachingMessage,
    AdminToken,
    /// Atomic claim marker used by the scheduler/coordinator to pick a due
    /// reminder exactly once (`check_and_set` with a short TTL).
    Claim,
    Counter,
    /// Index of reminders awaiting a firing deadline.
    SchedulerTimeout,
    /// Index of fired reminders awaiting a grace deadline.
    GraceTimeout,
    Custom(String),
}

impl KeyKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Medication => "medication",
            Self::Reminder => "reminder",
            Self::Habit => "habit",
            Self::HabitCompletion => "habit_completion",
            Self::AdherenceEvent => "adherence_event",
            Self::Pattern => "pattern",
            Self::CoachingMessage => "coaching_message",
            Self::AdminToken => "admin_token",
            Self::Claim => "claim",
            Self::Counter => "counter",
            Self::SchedulerTimeout => "scheduler_timeout",
            Self::GraceTimeout => "grace_timeout",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store.
///
/// Kilo Guardian runs single-node, single-user, so keys carry no
/// namespace/tenant dimension — only the entity kind and its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    #[must_use]
    pub fn new(kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_kind_as_str() {
        assert_eq!(KeyKind::Medication.as_str(), "medication");
        assert_eq!(KeyKind::Reminder.as_str(), "reminder");
        assert_eq!(KeyKind::SchedulerTimeout.as_str(), "scheduler_timeout");
        assert_eq!(KeyKind::GraceTimeout.as_str(), "grace_timeout");
        assert_eq!(KeyKind::Custom("foo".into()).as_str(), "foo");
    }

    #[test]
    fn state_key_canonical() {
        let key = StateKey::new(KeyKind::Reminder, "abc");
        assert_eq!(key.canonical(), "reminder:abc");
    }
}
