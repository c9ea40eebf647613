//! oc-protocol: Shared types for ollachat.
//!
//! This crate defines the wire records exchanged with the inference backend,
//! the events produced while a response streams in, and the error type every
//! request surfaces to its caller.

pub mod error;
pub mod message;
pub mod request;

pub use error::{ChatError, ErrorKind};
pub use message::{GenerationStats, ResponseEvent, StreamEvent};
pub use request::GenerateRequest;
