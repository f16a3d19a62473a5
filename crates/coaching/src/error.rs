use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachingError {
    #[error("medication not found: {0}")]
    NotFound(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
