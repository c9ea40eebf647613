//! Message types for decoded backend records and streaming events.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Timing and token counters the backend attaches to its final record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

impl GenerationStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One decoded record of a generate response.
///
/// In streaming mode the backend sends one of these per line; in
/// non-streaming mode the whole body is a single record with `done: true`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseEvent {
    /// Text to append. May be empty.
    #[serde(rename = "response", default)]
    pub fragment: String,

    /// Transport-level completion flag.
    #[serde(rename = "done", default)]
    pub is_final: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Error payload sent with a success status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub stats: GenerationStats,
}

impl ResponseEvent {
    /// A plain text fragment.
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            fragment: text.into(),
            ..Self::default()
        }
    }

    /// The closing record of a response.
    pub fn last(text: impl Into<String>) -> Self {
        Self {
            fragment: text.into(),
            is_final: true,
            ..Self::default()
        }
    }
}

/// Events emitted while a single request streams.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded record carrying the next fragment.
    Response(ResponseEvent),

    /// The transport ended normally.
    Done,

    /// The request failed. No further events follow.
    Error(ChatError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_streaming_record() {
        let event: ResponseEvent = serde_json::from_str(
            r#"{"model":"qwen2.5:0.5b","created_at":"2024-01-01T00:00:00Z","response":"Hel","done":false}"#,
        )
        .unwrap();
        assert_eq!(event.fragment, "Hel");
        assert!(!event.is_final);
        assert_eq!(event.model.as_deref(), Some("qwen2.5:0.5b"));
        assert!(event.error.is_none());
        assert!(event.stats.is_empty());
    }

    #[test]
    fn decode_final_record_with_stats() {
        let event: ResponseEvent = serde_json::from_str(
            r#"{"response":"","done":true,"total_duration":5043500667,"prompt_eval_count":26,"eval_count":290,"eval_duration":4709213000}"#,
        )
        .unwrap();
        assert!(event.is_final);
        assert_eq!(event.stats.total_duration, Some(5_043_500_667));
        assert_eq!(event.stats.prompt_eval_count, Some(26));
        assert_eq!(event.stats.eval_count, Some(290));
        assert_eq!(event.stats.load_duration, None);
    }

    #[test]
    fn decode_error_payload() {
        let event: ResponseEvent =
            serde_json::from_str(r#"{"error":"model 'nope' not found"}"#).unwrap();
        assert_eq!(event.fragment, "");
        assert!(!event.is_final);
        assert_eq!(event.error.as_deref(), Some("model 'nope' not found"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(serde_json::from_str::<ResponseEvent>("42").is_err());
        assert!(serde_json::from_str::<ResponseEvent>(r#""text""#).is_err());
    }

    #[test]
    fn constructors() {
        let event = ResponseEvent::fragment("abc");
        assert_eq!(event.fragment, "abc");
        assert!(!event.is_final);

        let event = ResponseEvent::last("end");
        assert!(event.is_final);
    }

    #[test]
    fn serialize_skips_empty_optionals() {
        let json = serde_json::to_string(&ResponseEvent::fragment("hi")).unwrap();
        assert_eq!(json, r#"{"response":"hi","done":false}"#);
    }
}
