//! Demo HTTP service that forwards questions to the configured LLM.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and model) |
//! | `POST` | `/ask` | `{ "question": "...", "system_prompt": "..."? }` → `{ "answer", "model" }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (502), `timeout` (504),
//! `config` (500).

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::{LlmClient, LlmError};

#[derive(Clone)]
pub struct AppState {
    llm: Arc<LlmClient>,
}

impl AppState {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm: Arc::new(llm) }
    }
}

/// Bind `[server].bind` and serve until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let llm = LlmClient::from_config(&config.llm)?;
    tracing::info!(model = %llm.model(), upstream = %config.llm.base_url, "LLM proxy configured");

    let app = build_router(AppState::new(llm));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("LLM proxy listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ask", post(handle_ask))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(code = self.code, "ask failed: {}", self.message);
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        let (status, code) = match &err {
            LlmError::EmptyQuestion => (StatusCode::BAD_REQUEST, "bad_request"),
            LlmError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            LlmError::MissingApiKey(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config"),
            LlmError::Upstream { .. } | LlmError::Transport(_) | LlmError::InvalidResponse(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    model: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.llm.model().to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub model: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let answer = state
        .llm
        .ask(&req.question, req.system_prompt.as_deref())
        .await?;

    Ok(Json(AskResponse {
        answer,
        model: state.llm.model().to_string(),
    }))
}
