use thiserror::Error;

#[derive(Debug, Error)]
pub enum MedicationError {
    #[error("medication not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Coordinator(#[from] kg_coordinator::CoordinatorError),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Errors from the OCR/vision extraction collaborator. Kept distinct from
/// [`MedicationError`]'s other variants since a failed extraction isn't
/// fatal to the caller — it falls back to a draft the user completes
/// manually.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("extraction request timed out after {0}s")]
    Timeout(u64),

    #[error("failed to parse extractor response: {0}")]
    Parse(String),

    #[error("extractor returned an error response: {0}")]
    Api(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
