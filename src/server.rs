use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, Method, StatusCode, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{AnswerRequest, AnswerResponse, HealthResponse, ModelRegistry},
    prompt,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let cors = cors_layer(&config);
    let state = AppState { registry, config };

    let api = Router::new()
        .route("/health", get(health))
        .route("/answer", post(answer_question));

    Router::new()
        .nest("/api", api.clone())
        .merge(api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = if config.allows_any_origin() {
        AllowOrigin::any()
    } else {
        let values: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.registry.is_ready() {
        (StatusCode::OK, Json(HealthResponse::ready()))
    } else {
        warn!(
            load_error = state.registry.load_error().unwrap_or("none recorded"),
            "health check: model not loaded"
        );
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HealthResponse::not_loaded()),
        )
    }
}

async fn answer_question(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ServiceError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "rejected answer request body");
        ServiceError::BadRequest(rejection.body_text())
    })?;
    let question = request.question()?;

    info!(question, "answering question");

    match state
        .registry
        .answer(question, &state.config.generation)
        .await
    {
        Ok(answer) => {
            info!(answer = prompt::preview(&answer, 100), "answer generated");
            Ok(Json(AnswerResponse { answer }))
        }
        Err(err) => {
            error!(error = %err, "answer generation failed");
            Err(err)
        }
    }
}
