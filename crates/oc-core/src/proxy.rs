//! HTTP proxy in front of the Ollama generate endpoint.
//!
//! Clients send only a prompt; the model and system prompt come from the
//! server's own configuration.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Json, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use oc_backend::{OllamaClient, OllamaError};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Failed to communicate with Ollama API")]
    Backend(#[from] OllamaError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ProxyError::Backend(err) => {
                error!(error = %err, "backend request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "Failed to communicate with Ollama API",
                        "details": err.to_string(),
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: OllamaClient,
    pub system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    stream: Option<bool>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/generate", post(generate))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `address` and serve until the process is stopped.
pub async fn serve(address: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(
        address = %listener.local_addr()?,
        endpoint = state.client.endpoint(),
        model = state.client.model(),
        "proxy listening"
    );
    axum::serve(listener, router(state)).await
}

async fn generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, ProxyError> {
    let Json(body) = body.map_err(|e| ProxyError::BadRequest(e.body_text()))?;
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ProxyError::BadRequest("prompt is required".to_string()))?;
    let stream = body.stream.unwrap_or(false);

    info!(prompt_len = prompt.len(), stream, "received generate request");

    let request = state
        .client
        .request(prompt)
        .with_stream(stream)
        .with_system(state.system.clone());
    let response = state.client.send_raw(&request).await?;

    if stream {
        return Ok((
            [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
            Body::from_stream(response.bytes_stream()),
        )
            .into_response());
    }

    let bytes = response.bytes().await.map_err(OllamaError::from)?;
    // Validate before relaying so a truncated body becomes a 500.
    let data: serde_json::Value = serde_json::from_slice(&bytes).map_err(OllamaError::from)?;
    Ok(Json(data).into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
