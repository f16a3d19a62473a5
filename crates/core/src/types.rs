use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(MedId);
id_newtype!(ReminderId);
id_newtype!(HabitId);
id_newtype!(HabitCompletionId);
id_newtype!(AdherenceEventId);
id_newtype!(PatternId);
id_newtype!(CoachingMessageId);
id_newtype!(AdminTokenId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_stable() {
        let a = MedId::new();
        let b = MedId::new();
        assert_ne!(a, b);
        let round_tripped = MedId::from(a.as_str());
        assert_eq!(a, round_tripped);
    }

    #[test]
    fn ids_serde_roundtrip() {
        let id = ReminderId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ReminderId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
