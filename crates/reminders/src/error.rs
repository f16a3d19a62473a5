use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("reminder not found: {0}")]
    NotFound(String),

    #[error("reminder {0} is not in a state that allows this transition")]
    InvalidTransition(String),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
