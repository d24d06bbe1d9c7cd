// HTTP API
// POST / runs a detection; GET /health reports the loaded model.

use crate::models::{DetectResponse, ErrorResponse, HealthResponse};
use crate::services::config_store::ServerConfig;
use crate::services::detection::{DetectError, Detector};
use crate::services::oracle::ScoringOracle;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    /// Shared read-only model handle, created once at startup
    pub oracle: Arc<dyn ScoringOracle>,
    pub detector: Arc<Detector>,
    /// Bounds how many detections hit the oracle at once
    pub inference_gate: Arc<Semaphore>,
    pub max_input_chars: usize,
    pub request_timeout: Duration,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(oracle: Arc<dyn ScoringOracle>, detector: Detector, server: &ServerConfig) -> Self {
        Self {
            oracle,
            detector: Arc::new(detector),
            inference_gate: Arc::new(Semaphore::new(server.max_concurrent_inference.max(1))),
            max_input_chars: server.max_input_chars,
            request_timeout: Duration::from_secs(server.request_timeout_secs),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No text provided")]
    MissingText,
    #[error("Text is too long (maximum {max_chars} characters)")]
    TooLong { max_chars: usize },
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("Detection timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingText => StatusCode::BAD_REQUEST,
            Self::TooLong { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Detect(e) if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Detect(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Pull a non-empty string `text` field out of a JSON body
fn parse_text(body: &[u8]) -> Result<String, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|_| ApiError::MissingText)?;
    value
        .get("text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingText)
}

pub async fn detect_text(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<DetectResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let t0 = Instant::now();

    let text = parse_text(&body).map_err(|e| {
        warn!(%request_id, "detect.malformed_request");
        e
    })?;

    let chars = text.chars().count();
    info!(%request_id, chars, "detect.request");
    if chars > state.max_input_chars {
        warn!(%request_id, chars, max = state.max_input_chars, "detect.too_long");
        return Err(ApiError::TooLong {
            max_chars: state.max_input_chars,
        });
    }

    // Too-short input never waits for the inference gate.
    if let Err(e) = state.detector.validate(&text) {
        info!(%request_id, "detect.too_short");
        return Err(e.into());
    }

    let run = async {
        let permit = state
            .inference_gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ApiError::Internal("inference gate closed".to_string()))?;
        let oracle = state.oracle.clone();
        let detector = state.detector.clone();

        // The permit lives until the blocking work ends, even if the request times out.
        let detection = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            detector.detect(&text, oracle.as_ref())
        })
        .await
        .map_err(|e| ApiError::Internal(format!("detection task failed: {}", e)))??;
        Ok::<_, ApiError>(detection)
    };

    let detection = match tokio::time::timeout(state.request_timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout {
            secs: state.request_timeout.as_secs(),
        }),
    }
    .map_err(|e| {
        error!(%request_id, error = %e, status = e.status().as_u16(), "detect.failed");
        e
    })?;

    info!(
        %request_id,
        label = detection.report.label.as_u8(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "detect.response"
    );

    Ok(Json(DetectResponse {
        output: detection.verdict,
        results: detection.report,
    }))
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let estimator = state.detector.estimator();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.oracle.model_id().to_string(),
        context_limit: estimator.context_limit(),
        stride: estimator.stride(),
    })
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(detect_text))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}
