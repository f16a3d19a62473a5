use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use kg_core::{MedId, Medication, Reminder, ReminderState};
use serde::Deserialize;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateMedicationRequest {
    pub name: String,
    pub dosage: String,
    pub quantity_remaining: i64,
    pub schedule_raw: String,
    pub timezone: String,
    pub prescriber: Option<String>,
    pub instructions: Option<String>,
    pub low_quantity_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMedicationRequest {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub quantity_remaining: Option<i64>,
    pub schedule_raw: Option<String>,
    pub timezone: Option<String>,
    pub prescriber: Option<String>,
    pub instructions: Option<String>,
    pub low_quantity_days: Option<u32>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Medication>>, GatewayError> {
    Ok(Json(state.medications.list().await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
) -> Result<Json<Medication>, GatewayError> {
    Ok(Json(state.medications.get(&id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateMedicationRequest>,
) -> Result<(StatusCode, Json<Medication>), GatewayError> {
    let mut med = Medication::new(
        body.name,
        body.dosage,
        body.quantity_remaining,
        body.schedule_raw,
        body.timezone,
    );
    if let Some(prescriber) = body.prescriber {
        med = med.with_prescriber(prescriber);
    }
    if let Some(instructions) = body.instructions {
        med = med.with_instructions(instructions);
    }
    if let Some(days) = body.low_quantity_days {
        med = med.with_low_quantity_days(days);
    }
    let created = state.medications.create(med).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
    Json(body): Json<UpdateMedicationRequest>,
) -> Result<Json<Medication>, GatewayError> {
    let updated = state
        .medications
        .update(&id, |med| {
            if let Some(name) = body.name {
                med.name = name;
            }
            if let Some(dosage) = body.dosage {
                med.dosage = dosage;
            }
            if let Some(quantity) = body.quantity_remaining {
                med.quantity_remaining = quantity;
            }
            if let Some(schedule_raw) = body.schedule_raw {
                med.schedule_raw = schedule_raw;
            }
            if let Some(timezone) = body.timezone {
                med.timezone = timezone;
            }
            if let Some(prescriber) = body.prescriber {
                med.prescriber = Some(prescriber);
            }
            if let Some(instructions) = body.instructions {
                med.instructions = Some(instructions);
            }
            if let Some(days) = body.low_quantity_days {
                med.low_quantity_days = days;
            }
        })
        .await?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
) -> Result<StatusCode, GatewayError> {
    state.medications.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Confirms the dose for this medication's currently-fired reminder,
/// without the caller needing to know the reminder's own id. Picks the
/// earliest-fired reminder still awaiting confirmation; there's normally at
/// most one, since a medication doesn't re-fire before the prior dose is
/// resolved.
pub async fn take(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
) -> Result<Json<Reminder>, GatewayError> {
    let fired = state
        .reminders
        .list_all()
        .await?
        .into_iter()
        .filter(|r| r.med_id.as_ref() == Some(&id) && r.state == ReminderState::Fired)
        .min_by_key(|r| r.fired_at);
    let Some(reminder) = fired else {
        return Err(GatewayError::NotFound(format!("no fired reminder for medication {id}")));
    };
    Ok(Json(state.coordinator.confirm(&reminder.id, Utc::now()).await?))
}

pub async fn adherence(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
) -> Result<Json<Vec<kg_core::AdherenceEvent>>, GatewayError> {
    Ok(Json(state.coordinator.adherence_for_medication(&id).await?))
}

pub async fn patterns(
    State(state): State<AppState>,
    Path(id): Path<MedId>,
) -> Result<Json<Vec<kg_core::Pattern>>, GatewayError> {
    Ok(Json(state.coaching.list_patterns(&id).await?))
}

/// Accepts a prescription label photo as multipart form data (single `image`
/// field) and returns the best-effort extracted draft.
pub async fn extract(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Medication>), GatewayError> {
    let mut image_bytes: Option<Vec<u8>> = None;
    let mut content_type = "application/octet-stream".to_owned();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| GatewayError::Validation(err.to_string()))?
    {
        if field.name() == Some("image") {
            content_type = field.content_type().unwrap_or("application/octet-stream").to_owned();
            let bytes = field
                .bytes()
                .await
                .map_err(|err| GatewayError::Validation(err.to_string()))?;
            image_bytes = Some(bytes.to_vec());
        }
    }

    let image_bytes = image_bytes.ok_or_else(|| GatewayError::Validation("missing image field".to_owned()))?;
    let draft = state.medications.extract(&image_bytes, &content_type).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}
