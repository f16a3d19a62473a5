use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_admin_token;
use crate::error::GatewayError;
use crate::state::AppState;
use crate::{admin, coaching, habits, meds, reminders};

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn enforce_timeout(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match tokio::time::timeout(state.config.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => GatewayError::Timeout.into_response(),
    }
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/admin/status", get(admin::status))
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/meds", get(meds::list).post(meds::create))
        .route("/meds/extract", post(meds::extract))
        .route(
            "/meds/{id}",
            get(meds::get).put(meds::update).delete(meds::delete),
        )
        .route("/meds/{id}/adherence", get(meds::adherence))
        .route("/meds/{id}/patterns", get(meds::patterns))
        .route("/meds/{id}/take", post(meds::take))
        .route("/reminders", get(reminders::list).post(reminders::create))
        .route("/reminders/{id}", get(reminders::get).delete(reminders::delete))
        .route("/reminders/{id}/confirm", post(reminders::confirm))
        .route("/reminders/{id}/snooze", post(reminders::snooze))
        .route("/habits", get(habits::list).post(habits::create))
        .route(
            "/habits/{id}",
            get(habits::get).put(habits::update).delete(habits::delete),
        )
        .route("/habits/{id}/complete", post(habits::complete))
        .route("/habits/complete/{id}", post(habits::complete))
        .route("/habits/{id}/streak", get(habits::streak))
        .route("/coaching/messages", get(coaching::messages))
        .route("/coaching/feedback", post(coaching::feedback_by_id))
        .route("/coaching/messages/{id}/feedback", post(coaching::feedback))
        .route("/admin/tokens", get(admin::list_tokens).post(admin::mint_token))
        .route("/admin/tokens/{id}/revoke", post(admin::revoke_token))
        .route("/admin/validate", get(admin::validate_self))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

/// Build the full gateway router: public routes unauthenticated, everything
/// else behind admin-token auth, with CORS, tracing, and a request-timeout
/// ceiling applied to the whole surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(public_routes())
        .merge(protected_routes(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), enforce_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
