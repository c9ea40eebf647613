//! oc-backend: Inference backend adapters for ollachat.
//!
//! This crate turns the byte stream of a generate call into decoded records
//! and request events: the NDJSON decoder, the Ollama HTTP client, and a
//! mock provider that feeds the same decoding path.

pub mod mock;
pub mod ndjson;
pub mod ollama;

pub use mock::{MockConfig, MockResponse};
pub use ndjson::{parse_ndjson_stream, NdjsonDecoder, NdjsonStream};
pub use ollama::{decode_events, OllamaClient, OllamaError};
