use thiserror::Error;

#[derive(Debug, Error)]
pub enum HabitError {
    #[error("habit not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
