use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{NaiveDate, Utc};
use kg_core::{Habit, HabitFrequency, HabitId};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateHabitRequest {
    pub name: String,
    pub frequency: HabitFrequency,
}

#[derive(Debug, Deserialize)]
pub struct UpdateHabitRequest {
    pub name: Option<String>,
    pub frequency: Option<HabitFrequency>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteHabitRequest {
    /// Defaults to today (UTC) when omitted.
    pub completion_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct StreakResponse {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub adherence_rate: f64,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Habit>>, GatewayError> {
    Ok(Json(state.habits.list_all().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<HabitId>,
) -> Result<Json<Habit>, GatewayError> {
    Ok(Json(state.habits.get(&id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateHabitRequest>,
) -> Result<(StatusCode, Json<Habit>), GatewayError> {
    let habit = Habit::new(body.name, body.frequency);
    let created = state.habits.create(habit).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<HabitId>,
    Json(body): Json<UpdateHabitRequest>,
) -> Result<Json<Habit>, GatewayError> {
    let updated = state
        .habits
        .update(&id, |habit| {
            if let Some(name) = body.name {
                habit.name = name;
            }
            if let Some(frequency) = body.frequency {
                habit.frequency = frequency;
            }
        })
        .await?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<HabitId>,
) -> Result<StatusCode, GatewayError> {
    state.habits.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<HabitId>,
    Json(body): Json<CompleteHabitRequest>,
) -> Result<Json<Habit>, GatewayError> {
    let completion_date = body.completion_date.unwrap_or_else(|| Utc::now().date_naive());
    let (habit, _) = state.habits.complete(&id, completion_date, None).await?;
    Ok(Json(habit))
}

pub async fn streak(
    State(state): State<AppState>,
    Path(id): Path<HabitId>,
) -> Result<Json<StreakResponse>, GatewayError> {
    let habit = state.habits.get(&id).await?;
    let today = Utc::now().date_naive();
    let adherence_rate = state.habits.adherence_rate(&id, today, 30).await?;
    Ok(Json(StreakResponse {
        current_streak: habit.current_streak,
        longest_streak: habit.longest_streak,
        adherence_rate,
    }))
}
