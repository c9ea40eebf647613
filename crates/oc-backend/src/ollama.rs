//! Ollama generate API client with NDJSON streaming support.

use std::fmt::Display;
use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use oc_protocol::{ChatError, GenerateRequest, ResponseEvent, StreamEvent};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ndjson::parse_ndjson_stream;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5:0.5b";
const GENERATE_PATH: &str = "/api/generate";

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Ollama API error: {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("{0}")]
    Backend(String),
}

impl From<OllamaError> for ChatError {
    fn from(err: OllamaError) -> Self {
        match err {
            OllamaError::Backend(message) => ChatError::backend(message),
            other => ChatError::transport(other.to_string()),
        }
    }
}

/// Ollama API client bound to one endpoint and model.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    endpoint: String,
    model: String,
    http: Client,
}

/// Build an HTTP client with a connect timeout.
///
/// No overall request timeout: a generation may legitimately stream for
/// minutes, and stalls are bounded per event by the caller instead.
fn build_http_client(connect_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(connect_timeout)
        .pool_max_idle_per_host(2)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to default HTTP client");
            Client::new()
        })
}

impl OllamaClient {
    /// Create a client for the given endpoint, e.g. `http://localhost:11434`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_model(endpoint, DEFAULT_MODEL)
    }

    pub fn with_model(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            http: build_http_client(Duration::from_secs(10)),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build a request for `prompt` against this client's model.
    pub fn request(&self, prompt: impl Into<String>) -> GenerateRequest {
        GenerateRequest::new(self.model.clone(), prompt)
    }

    fn generate_url(&self) -> String {
        format!("{}{GENERATE_PATH}", self.endpoint.trim_end_matches('/'))
    }

    /// Send the request and return the raw response once a success status
    /// has been seen. Used by the proxy to relay bodies unchanged.
    pub async fn send_raw(
        &self,
        request: &GenerateRequest,
    ) -> Result<reqwest::Response, OllamaError> {
        send_request(&self.http, &self.generate_url(), request).await
    }

    /// Send a non-streaming request and return its single record.
    pub async fn generate_once(
        &self,
        request: &GenerateRequest,
    ) -> Result<ResponseEvent, OllamaError> {
        let request = request.clone().with_stream(false);
        let response = send_request(&self.http, &self.generate_url(), &request).await?;
        let body = response.bytes().await?;
        let event: ResponseEvent = serde_json::from_slice(&body)?;
        match event.error {
            Some(message) => Err(OllamaError::Backend(message)),
            None => Ok(event),
        }
    }

    /// Send a request and return a stream of events.
    ///
    /// Streaming requests yield one `Response` per decoded record; a
    /// non-streaming request yields exactly one. Either way the stream ends
    /// with `Done` or a single `Error`.
    pub fn generate(
        &self,
        request: &GenerateRequest,
    ) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let client = self.clone();
        let request = request.clone();

        stream! {
            if !request.stream {
                match client.generate_once(&request).await {
                    Ok(event) => {
                        yield StreamEvent::Response(event);
                        yield StreamEvent::Done;
                    }
                    Err(e) => yield StreamEvent::Error(e.into()),
                }
                return;
            }

            match send_request(&client.http, &client.generate_url(), &request).await {
                Ok(response) => {
                    let mut events = Box::pin(decode_events(response.bytes_stream()));
                    while let Some(event) = events.next().await {
                        yield event;
                    }
                }
                Err(e) => {
                    yield StreamEvent::Error(e.into());
                }
            }
        }
    }
}

async fn send_request(
    http: &Client,
    url: &str,
    request: &GenerateRequest,
) -> Result<reqwest::Response, OllamaError> {
    debug!(%url, model = %request.model, stream = request.stream, "sending generate request");

    let response = http.post(url).json(request).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "generate request rejected");
        return Err(OllamaError::Status { status, body });
    }

    Ok(response)
}

/// Turn a raw NDJSON byte stream into request events.
///
/// A record carrying an `error` payload ends the stream with a backend
/// error; a transport error ends it with a transport error. Otherwise the
/// stream ends with `Done` once the transport is exhausted.
pub fn decode_events<S, E>(bytes: S) -> impl Stream<Item = StreamEvent> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    stream! {
        let mut records = parse_ndjson_stream(bytes);

        while let Some(result) = records.next().await {
            match result {
                Ok(event) => {
                    if let Some(message) = event.error {
                        yield StreamEvent::Error(ChatError::backend(message));
                        return;
                    }
                    yield StreamEvent::Response(event);
                }
                Err(e) => {
                    yield StreamEvent::Error(ChatError::transport(format!("stream error: {e}")));
                    return;
                }
            }
        }

        yield StreamEvent::Done;
    }
}
