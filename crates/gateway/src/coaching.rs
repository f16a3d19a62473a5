use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use kg_core::{CoachingFeedback, CoachingMessage, CoachingMessageId};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub feedback: CoachingFeedback,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackByIdRequest {
    pub message_id: CoachingMessageId,
    pub feedback: CoachingFeedback,
}

/// Messages ready to be shown right now. Also marks each returned message
/// delivered, following a pull-then-acknowledge notification idiom.
pub async fn messages(State(state): State<AppState>) -> Result<Json<Vec<CoachingMessage>>, GatewayError> {
    let pending = state.coaching.pending_messages().await?;
    for message in &pending {
        state.coaching.mark_delivered(&message.id).await?;
    }
    Ok(Json(pending))
}

pub async fn feedback(
    State(state): State<AppState>,
    Path(id): Path<CoachingMessageId>,
    Json(body): Json<FeedbackRequest>,
) -> Result<StatusCode, GatewayError> {
    state.coaching.record_feedback(&id, body.feedback).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Identical to [`feedback`] but takes the message id in the body instead
/// of the path, matching the external-facing `/coaching/feedback` route.
pub async fn feedback_by_id(
    State(state): State<AppState>,
    Json(body): Json<FeedbackByIdRequest>,
) -> Result<StatusCode, GatewayError> {
    state.coaching.record_feedback(&body.message_id, body.feedback).await?;
    Ok(StatusCode::NO_CONTENT)
}
