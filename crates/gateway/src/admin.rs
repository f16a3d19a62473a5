use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use kg_core::AdminTokenId;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MintTokenRequest {
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["admin".to_owned()]
}

#[derive(Debug, Serialize)]
pub struct MintTokenResponse {
    pub id: AdminTokenId,
    /// Shown exactly once; the gateway never stores it in recoverable form.
    pub token: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenSummary {
    pub id: AdminTokenId,
    pub scopes: Vec<String>,
    pub revoked: bool,
}

pub async fn mint_token(
    State(state): State<AppState>,
    Json(body): Json<MintTokenRequest>,
) -> Result<(StatusCode, Json<MintTokenResponse>), GatewayError> {
    let (token, raw) = state.tokens.mint(body.scopes).await?;
    Ok((
        StatusCode::CREATED,
        Json(MintTokenResponse {
            id: token.id,
            token: raw,
            scopes: token.scopes,
        }),
    ))
}

pub async fn list_tokens(State(state): State<AppState>) -> Result<Json<Vec<TokenSummary>>, GatewayError> {
    let tokens = state
        .tokens
        .list()
        .await?
        .into_iter()
        .map(|token| TokenSummary {
            id: token.id,
            scopes: token.scopes,
            revoked: token.revoked_at.is_some(),
        })
        .collect();
    Ok(Json(tokens))
}

pub async fn revoke_token(
    State(state): State<AppState>,
    Path(id): Path<AdminTokenId>,
) -> Result<StatusCode, GatewayError> {
    state.tokens.revoke(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Validates the caller's own token, echoing back its scopes. Useful for a
/// client to check whether its stored token is still good without exercising
/// any other protected route.
pub async fn validate_self(
    State(_state): State<AppState>,
    axum::Extension(token): axum::Extension<kg_core::AdminToken>,
) -> Json<TokenSummary> {
    Json(TokenSummary {
        id: token.id,
        scopes: token.scopes,
        revoked: token.revoked_at.is_some(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub backends: BTreeMap<String, bool>,
}

/// Fans out to each in-process component with a short per-check timeout.
/// There is nothing to fail over the network here (everything lives in this
/// process), so a failing check means the component itself errored, not
/// that it was unreachable.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let timeout = state.config.health_check_timeout;
    let mut backends = BTreeMap::new();

    backends.insert(
        "medications".to_owned(),
        tokio::time::timeout(timeout, state.medications.list()).await.is_ok_and(|r| r.is_ok()),
    );
    backends.insert(
        "reminders".to_owned(),
        tokio::time::timeout(timeout, state.reminders.list_all()).await.is_ok_and(|r| r.is_ok()),
    );
    backends.insert(
        "habits".to_owned(),
        tokio::time::timeout(timeout, state.habits.list_all()).await.is_ok_and(|r| r.is_ok()),
    );
    backends.insert(
        "coaching".to_owned(),
        tokio::time::timeout(timeout, state.coaching.pending_messages()).await.is_ok_and(|r| r.is_ok()),
    );

    Json(StatusResponse { backends })
}
