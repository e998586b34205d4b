use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use retouch_contracts::edits::EditPayload;
use retouch_contracts::envelope::{EditResponse, ErrorEnvelope};
use retouch_engine::{error_chain_text, EditEngine, Settings};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    pub cors_origin: String,
    pub max_body_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cors_origin: non_empty_env("RETOUCH_CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            max_body_bytes: non_empty_env("RETOUCH_MAX_BODY_BYTES")
                .and_then(|raw| raw.parse::<usize>().ok())
                .filter(|bytes| *bytes > 0)
                .unwrap_or(defaults.max_body_bytes),
        }
    }
}

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request")]
    BadRequest(String),
    #[error("Image edit failed")]
    Pipeline(String),
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> &str {
        match self {
            ApiError::BadRequest(details)
            | ApiError::Pipeline(details)
            | ApiError::Internal(details) => details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: self.to_string(),
            details: self.details().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub fn router(settings: Settings, options: &ServerOptions) -> Result<Router> {
    let origin = HeaderValue::from_str(&options.cors_origin)
        .with_context(|| format!("invalid CORS origin '{}'", options.cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    let state = AppState {
        settings: Arc::new(settings),
    };
    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/edit-image", post(edit_image))
        .layer(DefaultBodyLimit::max(options.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn serve(bind: &str, settings: Settings) -> Result<()> {
    let app = router(settings, &ServerOptions::from_env())?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!("listening on {bind}");
    axum::serve(listener, app).await.context("server terminated")?;
    Ok(())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn edit_image(
    State(state): State<AppState>,
    payload: Result<Json<EditPayload>, JsonRejection>,
) -> Result<Json<EditResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let request = payload
        .into_request()
        .map_err(|err| ApiError::BadRequest(error_chain_text(&err, 512)))?;

    let settings = state.settings.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<EditResponse> {
        let engine = EditEngine::from_settings(&settings)?;
        engine.run(&request)
    })
    .await
    .map_err(|err| ApiError::Internal(err.to_string()))?;

    match outcome {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            let details = error_chain_text(&err, 1024);
            tracing::error!(%details, "image edit failed");
            Err(ApiError::Pipeline(details))
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
