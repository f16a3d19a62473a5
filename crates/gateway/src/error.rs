use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by gateway handlers, consolidating every sibling crate's
/// error type at the one seam that turns them into an HTTP response.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("admin token not found: {0}")]
    TokenNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error(transparent)]
    Medication(#[from] kg_medications::MedicationError),

    #[error(transparent)]
    Reminder(#[from] kg_reminders::ReminderError),

    #[error(transparent)]
    Habit(#[from] kg_habits::HabitError),

    #[error(transparent)]
    Coordinator(#[from] kg_coordinator::CoordinatorError),

    #[error(transparent)]
    Coaching(#[from] kg_coaching::CoachingError),

    #[error(transparent)]
    State(#[from] kg_state::StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::TokenNotFound(_) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Medication(kg_medications::MedicationError::NotFound(_))
            | Self::Reminder(kg_reminders::ReminderError::NotFound(_))
            | Self::Habit(kg_habits::HabitError::NotFound(_))
            | Self::Coordinator(kg_coordinator::CoordinatorError::MedicationNotFound(_))
            | Self::Coaching(kg_coaching::CoachingError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Reminder(kg_reminders::ReminderError::InvalidTransition(_))
            | Self::Coordinator(kg_coordinator::CoordinatorError::TooEarly)
            | Self::Coordinator(kg_coordinator::CoordinatorError::SnoozeLimitReached) => {
                StatusCode::CONFLICT
            }
            Self::Medication(kg_medications::MedicationError::Extraction(_)) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "gateway request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
