//! Mock backend for testing.
//!
//! Produces raw NDJSON byte chunks exactly as the HTTP transport would, and
//! routes them through the same decoding path as the real client, so tests
//! at every layer exercise chunk splitting and record decoding.

use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::Stream;
use oc_protocol::{ResponseEvent, StreamEvent};
use tokio::time::sleep;

use crate::ollama::decode_events;

/// Configurable mock responses for testing.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Emit one well-formed record.
    Fragment { content: String, done: bool },
    /// Emit raw bytes as-is (partial or malformed records).
    Raw { bytes: String },
    /// Fail the transport.
    Error { message: String },
    /// Delay before the next response (for timing tests).
    Delay { ms: u64 },
}

/// Configuration for a mock byte stream.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Sequence of responses to emit.
    pub responses: Vec<MockResponse>,
    /// Optional delay between each response (ms).
    pub chunk_delay_ms: Option<u64>,
    /// Re-split every payload into chunks of at most this many bytes.
    pub chunk_size: Option<usize>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }
}

fn encode_record(content: &str, done: bool) -> String {
    let event = ResponseEvent {
        fragment: content.to_string(),
        is_final: done,
        ..ResponseEvent::default()
    };
    let mut line = serde_json::to_string(&event).unwrap_or_default();
    line.push('\n');
    line
}

fn split_payload(payload: &[u8], chunk_size: Option<usize>) -> Vec<Bytes> {
    match chunk_size {
        Some(size) => payload
            .chunks(size)
            .map(Bytes::copy_from_slice)
            .collect(),
        None => vec![Bytes::copy_from_slice(payload)],
    }
}

/// Create the raw byte stream described by a mock config.
pub fn mock_byte_stream(
    config: MockConfig,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    stream! {
        for response in config.responses {
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }

            let payload = match response {
                MockResponse::Fragment { content, done } => encode_record(&content, done),
                MockResponse::Raw { bytes } => bytes,
                MockResponse::Error { message } => {
                    yield Err::<Bytes, std::io::Error>(std::io::Error::other(message));
                    return;
                }
                MockResponse::Delay { ms } => {
                    sleep(Duration::from_millis(ms)).await;
                    continue;
                }
            };

            for chunk in split_payload(payload.as_bytes(), config.chunk_size) {
                yield Ok::<Bytes, std::io::Error>(chunk);
            }
        }
    }
}

/// Create a stream of `StreamEvent`s from a mock config.
pub fn mock_stream(config: MockConfig) -> impl Stream<Item = StreamEvent> + Send + 'static {
    decode_events(Box::pin(mock_byte_stream(config)))
}

/// Built-in test fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    fn fragments(chunks: &[&str]) -> Vec<MockResponse> {
        let last = chunks.len().saturating_sub(1);
        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| MockResponse::Fragment {
                content: (*chunk).to_string(),
                done: i == last,
            })
            .collect()
    }

    /// One record per chunk; the last one is marked done.
    pub fn streaming_text(chunks: &[&str]) -> MockConfig {
        MockConfig::new().with_responses(fragments(chunks))
    }

    /// A thinking region followed by the answer, one record each.
    pub fn thinking_then_answer(thinking: &str, answer: &str) -> MockConfig {
        streaming_text(&["<think>", thinking, "</think>", answer])
    }

    /// Some records, then a transport failure.
    pub fn error_mid_stream(before: &[&str], error: &str) -> MockConfig {
        let mut responses: Vec<MockResponse> = before
            .iter()
            .map(|chunk| MockResponse::Fragment {
                content: (*chunk).to_string(),
                done: false,
            })
            .collect();
        responses.push(MockResponse::Error {
            message: error.to_string(),
        });
        MockConfig::new().with_responses(responses)
    }

    /// A success-status stream whose second record is an error payload.
    pub fn backend_error_after(before: &str, error: &str) -> MockConfig {
        let payload = serde_json::json!({ "error": error }).to_string();
        MockConfig::new().with_responses(vec![
            MockResponse::Fragment {
                content: before.to_string(),
                done: false,
            },
            MockResponse::Raw {
                bytes: format!("{payload}\n"),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use oc_protocol::{ChatError, ErrorKind};

    fn fragment_texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Response(r) => Some(r.fragment.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn mock_stream_emits_events() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Fragment {
                content: "Hello".to_string(),
                done: false,
            },
            MockResponse::Fragment {
                content: " world".to_string(),
                done: true,
            },
        ]);

        let events: Vec<_> = mock_stream(config).collect().await;

        assert_eq!(events.len(), 3); // 2 records + Done
        assert_eq!(events[0], StreamEvent::Response(ResponseEvent::fragment("Hello")));
        assert_eq!(events[1], StreamEvent::Response(ResponseEvent::last(" world")));
        assert_eq!(events[2], StreamEvent::Done);
    }

    #[tokio::test]
    async fn byte_stream_respects_chunk_size() {
        let config = fixtures::streaming_text(&["abc"]).with_chunk_size(4);
        let chunks: Vec<_> = mock_byte_stream(config).collect().await;

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.as_ref().unwrap().len() <= 4));

        let joined: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(joined, b"{\"response\":\"abc\",\"done\":true}\n");
    }

    #[tokio::test]
    async fn tiny_chunks_decode_identically() {
        let whole: Vec<_> = mock_stream(fixtures::thinking_then_answer("step one", "final answer"))
            .collect()
            .await;
        let split: Vec<_> = mock_stream(
            fixtures::thinking_then_answer("step one", "final answer").with_chunk_size(1),
        )
        .collect()
        .await;

        assert_eq!(whole, split);
        assert_eq!(
            fragment_texts(&split),
            vec!["<think>", "step one", "</think>", "final answer"]
        );
    }

    #[tokio::test]
    async fn raw_malformed_line_is_skipped() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Fragment {
                content: "a".to_string(),
                done: false,
            },
            MockResponse::Raw {
                bytes: "{\"response\": oops}\n".to_string(),
            },
            MockResponse::Fragment {
                content: "b".to_string(),
                done: true,
            },
        ]);

        let events: Vec<_> = mock_stream(config).collect().await;
        assert_eq!(fragment_texts(&events), vec!["a", "b"]);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn fixture_error_mid_stream() {
        let config = fixtures::error_mid_stream(&["one", "two"], "connection reset");
        let events: Vec<_> = mock_stream(config).collect().await;

        assert_eq!(events.len(), 3); // 2 records + error, no Done
        assert_eq!(fragment_texts(&events), vec!["one", "two"]);
        match &events[2] {
            StreamEvent::Error(err) => {
                assert_eq!(err.kind, ErrorKind::Transport);
                assert!(err.message.contains("connection reset"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fixture_backend_error_after() {
        let config = fixtures::backend_error_after("partial", "model crashed");
        let events: Vec<_> = mock_stream(config).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Error(ChatError::backend("model crashed")));
    }

    #[tokio::test]
    async fn delay_emits_nothing() {
        let config = MockConfig::new().with_responses(vec![
            MockResponse::Delay { ms: 5 },
            MockResponse::Fragment {
                content: "late".to_string(),
                done: true,
            },
        ]);
        let events: Vec<_> = mock_stream(config).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(fragment_texts(&events), vec!["late"]);
    }
}
