use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use kg_core::{ReminderId, RecurrenceKind, Reminder};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::state::AppState;

/// Creates a standalone reminder not tied to a medication's schedule
/// (the frontend-friendly path described alongside `Reminder::title`).
#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    pub title: String,
    pub description: Option<String>,
    pub fire_at: chrono::DateTime<Utc>,
    pub grace_window_minutes: Option<u32>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Reminder>>, GatewayError> {
    Ok(Json(state.reminders.list_all().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<Json<Reminder>, GatewayError> {
    Ok(Json(state.reminders.get(&id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), GatewayError> {
    let mut reminder = Reminder::new(body.fire_at, RecurrenceKind::None).with_title(body.title);
    if let Some(description) = body.description {
        reminder = reminder.with_description(description);
    }
    if let Some(minutes) = body.grace_window_minutes {
        reminder = reminder.with_grace_window_minutes(minutes);
    }
    let created = state.reminders.create(reminder).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<StatusCode, GatewayError> {
    state.reminders.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Confirms a fired (or missed) reminder: the dose-taken path.
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<Json<Reminder>, GatewayError> {
    Ok(Json(state.coordinator.confirm(&id, Utc::now()).await?))
}

pub async fn snooze(
    State(state): State<AppState>,
    Path(id): Path<ReminderId>,
) -> Result<Json<Reminder>, GatewayError> {
    Ok(Json(state.coordinator.snooze(&id, Utc::now()).await?))
}
