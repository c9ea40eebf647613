//! Response assembly: accumulates streamed fragments and splits the
//! accumulated text into a thinking region and the visible answer.
//!
//! The split is recomputed from the whole buffer after every fragment, so a
//! marker that arrives in pieces is recognised as soon as its last byte is in.

use oc_protocol::ResponseEvent;
use serde::Deserialize;

pub const DEFAULT_OPEN_MARKER: &str = "<think>";
pub const DEFAULT_CLOSE_MARKER: &str = "</think>";

/// Literal strings delimiting the thinking region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub open: String,
    pub close: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(DEFAULT_OPEN_MARKER, DEFAULT_CLOSE_MARKER)
    }
}

impl Markers {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// What the answer shows while a thinking region is open but not yet closed.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnclosedPolicy {
    /// The raw buffer, unclosed marker included.
    #[default]
    Show,
    /// Only the text before the open marker.
    Hide,
}

/// Per-request assembly settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblerConfig {
    pub markers: Markers,
    pub unclosed: UnclosedPolicy,
}

/// What the presentation layer shows for a request right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplaySnapshot {
    pub thinking: Option<String>,
    pub answer: String,
}

/// True while an open marker has been seen without its close marker.
pub fn thinking_open(buffer: &str, markers: &Markers) -> bool {
    find_region(buffer, markers) == Region::Open
}

#[derive(Debug, PartialEq, Eq)]
enum Region {
    None,
    Open,
    /// Byte offsets: open marker start, inner start, inner end, close marker end.
    Closed {
        start: usize,
        inner_start: usize,
        inner_end: usize,
        end: usize,
    },
}

fn find_region(buffer: &str, markers: &Markers) -> Region {
    if markers.open.is_empty() || markers.close.is_empty() {
        return Region::None;
    }
    let Some(start) = buffer.find(&markers.open) else {
        return Region::None;
    };
    let inner_start = start + markers.open.len();
    match buffer[inner_start..].find(&markers.close) {
        Some(offset) => {
            let inner_end = inner_start + offset;
            Region::Closed {
                start,
                inner_start,
                inner_end,
                end: inner_end + markers.close.len(),
            }
        }
        None => Region::Open,
    }
}

/// Split an accumulated buffer into thinking and answer text.
///
/// Pure: the same buffer and configuration always give the same snapshot.
pub fn split(buffer: &str, config: &AssemblerConfig) -> DisplaySnapshot {
    match find_region(buffer, &config.markers) {
        Region::None => DisplaySnapshot {
            thinking: None,
            answer: buffer.to_string(),
        },
        Region::Open => {
            let answer = match config.unclosed {
                UnclosedPolicy::Show => buffer.to_string(),
                UnclosedPolicy::Hide => {
                    let start = buffer.find(&config.markers.open).unwrap_or(buffer.len());
                    buffer[..start].trim().to_string()
                }
            };
            DisplaySnapshot {
                thinking: None,
                answer,
            }
        }
        Region::Closed {
            start,
            inner_start,
            inner_end,
            end,
        } => {
            let mut answer = String::with_capacity(buffer.len() - (end - start));
            answer.push_str(&buffer[..start]);
            answer.push_str(&buffer[end..]);
            DisplaySnapshot {
                thinking: Some(buffer[inner_start..inner_end].trim().to_string()),
                answer: answer.trim().to_string(),
            }
        }
    }
}

/// Owns the accumulated text of one in-flight request.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    buffer: String,
    config: AssemblerConfig,
}

impl ResponseAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            buffer: String::new(),
            config,
        }
    }

    /// Append the event's fragment and return the resulting snapshot.
    pub fn on_event(&mut self, event: &ResponseEvent) -> DisplaySnapshot {
        self.buffer.push_str(&event.fragment);
        self.snapshot()
    }

    /// Recompute the snapshot of the current buffer.
    pub fn snapshot(&self) -> DisplaySnapshot {
        split(&self.buffer, &self.config)
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    /// True while the thinking region is open.
    pub fn thinking_open(&self) -> bool {
        thinking_open(&self.buffer, &self.config.markers)
    }
}
