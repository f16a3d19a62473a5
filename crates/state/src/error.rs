use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("compare-and-swap conflict: expected version {expected}, found {found}")]
    CasConflict { expected: u64, found: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation timed out")]
    Timeout,
}
