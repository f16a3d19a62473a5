use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::GatewayError;
use crate::state::AppState;

const TOKEN_HEADER: &str = "x-admin-token";

/// Gate protected routes behind a valid admin token. Runs before any
/// handler, so an invalid or missing token never reaches a backend.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let raw_token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(GatewayError::Unauthorized)?;

    let token = state
        .tokens
        .validate(raw_token)
        .await?
        .ok_or(GatewayError::Unauthorized)?;

    let mut request = request;
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::middleware;
    use axum::routing::get;
    use kg_state_memory::MemoryStateStore;
    use tower::ServiceExt;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::tokens::AdminTokenStore;

    async fn dummy_state() -> AppState {
        let store: Arc<dyn kg_state::StateStore> = Arc::new(MemoryStateStore::new());
        let bus = Arc::new(kg_bus::EventBus::new());
        let reminders = Arc::new(kg_reminders::ReminderStore::new(store.clone()));
        let habits = Arc::new(kg_habits::HabitStore::new(store.clone()));
        let coordinator = Arc::new(kg_coordinator::Coordinator::new(
            store.clone(),
            reminders.clone(),
            habits.clone(),
            bus.clone(),
            kg_coordinator::CoordinatorConfig::default(),
        ));
        let extractor: Arc<dyn kg_medications::AsyncExtractor> =
            Arc::new(kg_medications::NoopExtractor);
        AppState {
            medications: Arc::new(kg_medications::MedicationRegistry::new(
                store.clone(),
                coordinator.clone(),
                bus.clone(),
                extractor,
            )),
            reminders,
            habits,
            coordinator,
            coaching: Arc::new(kg_coaching::CoachingEngine::new(
                kg_coaching::CoachingStore::new(store.clone()),
                bus,
                kg_coaching::CoachingConfig::default(),
            )),
            tokens: Arc::new(AdminTokenStore::new(store)),
            config: Arc::new(GatewayConfig::default()),
        }
    }

    fn protected_app(state: AppState) -> Router {
        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_admin_token))
            .with_state(state)
    }

    #[tokio::test]
    async fn missing_token_is_rejected() {
        let state = dummy_state().await;
        let app = protected_app(state);
        let response = app
            .oneshot(Request::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_token_is_admitted() {
        let state = dummy_state().await;
        let (_, raw) = state.tokens.mint(vec!["admin".to_owned()]).await.unwrap();
        let app = protected_app(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/protected")
                    .header(TOKEN_HEADER, raw)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
