//! Terminal output for a streaming request.
//!
//! `SnapshotRenderer<W: Write>` follows the forward-flow pattern: while the
//! request streams, TTY output is a single status line overwritten in place;
//! once the request finishes the status line is cleared and the final
//! snapshot is printed. Non-TTY output has no status line and no escape codes.

use std::io::Write;

use crate::assembler::{thinking_open, DisplaySnapshot, Markers};
use crate::format::{tokenize, Block, Inline};
use crate::session::{RequestOutcome, RequestState, SnapshotHandler};
use crate::style::Style;

pub struct SnapshotRenderer<W: Write> {
    pub writer: W,
    style: Style,
    is_tty: bool,
    markers: Markers,
    status_active: bool,
}

impl<W: Write> SnapshotRenderer<W> {
    pub fn new(writer: W, is_tty: bool, markers: Markers) -> Self {
        let style = if is_tty { Style::new() } else { Style::disabled() };
        Self::with_style(writer, is_tty, markers, style)
    }

    pub fn with_style(writer: W, is_tty: bool, markers: Markers, style: Style) -> Self {
        Self {
            writer,
            style,
            is_tty,
            markers,
            status_active: false,
        }
    }

    pub fn status_active(&self) -> bool {
        self.status_active
    }

    fn clear_status(&mut self) {
        if self.status_active {
            let _ = write!(self.writer, "\r\x1b[K");
            self.status_active = false;
        }
    }

    fn emit_status(&mut self, snapshot: &DisplaySnapshot) {
        let label = if thinking_open(&snapshot.answer, &self.markers) {
            "thinking...".to_string()
        } else {
            format!("answering... ({} chars)", snapshot.answer.chars().count())
        };
        let _ = write!(
            self.writer,
            "\r\x1b[K{}{}{}",
            self.style.cyan_start(),
            label,
            self.style.reset()
        );
        let _ = self.writer.flush();
        self.status_active = true;
    }

    fn emit_thinking(&mut self, thinking: &str) {
        for line in thinking.lines() {
            let _ = writeln!(
                self.writer,
                "{}# {}{}",
                self.style.dim_start(),
                line,
                self.style.reset()
            );
        }
        let _ = writeln!(self.writer);
    }

    fn inline_text(&self, spans: &[Inline]) -> String {
        let mut out = String::new();
        for span in spans {
            match span {
                Inline::Text(text) => out.push_str(text),
                Inline::Strong(text) => {
                    out.push_str(self.style.bold_start());
                    out.push_str(text);
                    out.push_str(self.style.reset());
                }
            }
        }
        out
    }

    fn emit_block(&mut self, block: &Block) {
        match block {
            Block::Paragraph(spans) => {
                let text = self.inline_text(spans);
                let _ = writeln!(self.writer, "{text}");
            }
            Block::Code { language, code } => {
                let _ = writeln!(
                    self.writer,
                    "{}[{}]{}",
                    self.style.dim_start(),
                    language,
                    self.style.reset()
                );
                for line in code.lines() {
                    let _ = writeln!(self.writer, "    {line}");
                }
            }
            Block::OrderedList(items) => {
                for (i, item) in items.iter().enumerate() {
                    let text = self.inline_text(item);
                    let _ = writeln!(self.writer, "{}. {}", i + 1, text);
                }
            }
        }
    }

    /// Print a snapshot in its final form.
    pub fn emit_snapshot(&mut self, snapshot: &DisplaySnapshot) {
        self.clear_status();
        if let Some(thinking) = snapshot.thinking.as_deref().filter(|t| !t.is_empty()) {
            self.emit_thinking(thinking);
        }
        let blocks = tokenize(&snapshot.answer);
        for (i, block) in blocks.iter().enumerate() {
            if i > 0 {
                let _ = writeln!(self.writer);
            }
            self.emit_block(block);
        }
    }

    pub fn emit_error(&mut self, message: &str) {
        self.clear_status();
        let _ = writeln!(
            self.writer,
            "{}error: {}{}",
            self.style.red_start(),
            message,
            self.style.reset()
        );
    }

    pub fn emit_cancelled(&mut self) {
        self.clear_status();
        let _ = writeln!(
            self.writer,
            "{}cancelled{}",
            self.style.dim_start(),
            self.style.reset()
        );
    }
}

impl<W: Write + Send> SnapshotHandler for SnapshotRenderer<W> {
    fn on_snapshot(&mut self, snapshot: &DisplaySnapshot) {
        if self.is_tty {
            self.emit_status(snapshot);
        }
    }

    fn on_finish(&mut self, outcome: &RequestOutcome) {
        if let Some(snapshot) = &outcome.snapshot {
            self.emit_snapshot(snapshot);
        }
        match &outcome.state {
            RequestState::Failed(err) => self.emit_error(&err.to_string()),
            RequestState::Cancelled => self.emit_cancelled(),
            _ => self.clear_status(),
        }
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_protocol::ChatError;

    fn make_renderer(is_tty: bool) -> SnapshotRenderer<Vec<u8>> {
        SnapshotRenderer::with_style(Vec::new(), is_tty, Markers::default(), Style::disabled())
    }

    fn output_str(r: &SnapshotRenderer<Vec<u8>>) -> String {
        String::from_utf8_lossy(&r.writer).to_string()
    }

    fn snapshot(thinking: Option<&str>, answer: &str) -> DisplaySnapshot {
        DisplaySnapshot {
            thinking: thinking.map(str::to_string),
            answer: answer.to_string(),
        }
    }

    fn completed(snapshot: DisplaySnapshot) -> RequestOutcome {
        RequestOutcome {
            state: RequestState::Completed,
            snapshot: Some(snapshot),
        }
    }

    #[test]
    fn status_line_while_thinking() {
        let mut r = make_renderer(true);
        r.on_snapshot(&snapshot(None, "<think>weighing"));
        assert!(r.status_active());
        assert!(output_str(&r).contains("thinking..."));
    }

    #[test]
    fn status_line_counts_answer_chars() {
        let mut r = make_renderer(true);
        r.on_snapshot(&snapshot(Some("x"), "héllo"));
        assert!(output_str(&r).ends_with("answering... (5 chars)"));
    }

    #[test]
    fn non_tty_prints_nothing_while_streaming() {
        let mut r = make_renderer(false);
        r.on_snapshot(&snapshot(None, "partial"));
        assert!(!r.status_active());
        assert!(output_str(&r).is_empty());
    }

    #[test]
    fn finish_clears_status_before_final_output() {
        let mut r = make_renderer(true);
        r.on_snapshot(&snapshot(None, "Hi"));
        r.on_finish(&completed(snapshot(None, "Hi")));

        assert!(!r.status_active());
        let s = output_str(&r);
        assert!(s.ends_with("\r\x1b[KHi\n"), "got {s:?}");
    }

    #[test]
    fn thinking_rendered_as_comments() {
        let mut r = make_renderer(false);
        r.on_finish(&completed(snapshot(
            Some("first\nsecond"),
            "The answer.",
        )));
        assert_eq!(output_str(&r), "# first\n# second\n\nThe answer.\n");
    }

    #[test]
    fn empty_thinking_is_omitted() {
        let mut r = make_renderer(false);
        r.on_finish(&completed(snapshot(Some(""), "Hi")));
        assert_eq!(output_str(&r), "Hi\n");
    }

    #[test]
    fn blocks_are_formatted() {
        let mut r = make_renderer(false);
        r.on_finish(&completed(snapshot(
            None,
            "Steps:\n1. **Build**\n2. Run\n```sh\ncargo run\n```",
        )));
        assert_eq!(
            output_str(&r),
            "Steps:\n\n1. Build\n2. Run\n\n[sh]\n    cargo run\n"
        );
    }

    #[test]
    fn bold_uses_escape_codes_when_enabled() {
        let mut r = SnapshotRenderer::with_style(
            Vec::new(),
            false,
            Markers::default(),
            Style::force_enabled(),
        );
        r.emit_snapshot(&snapshot(None, "a **b**"));
        assert_eq!(output_str(&r), "a \x1b[1mb\x1b[0m\n");
    }

    #[test]
    fn failure_keeps_snapshot_and_prints_error() {
        let mut r = make_renderer(false);
        r.on_finish(&RequestOutcome {
            state: RequestState::Failed(ChatError::transport("connection reset")),
            snapshot: Some(snapshot(None, "partial answer")),
        });
        let s = output_str(&r);
        assert_eq!(s, "partial answer\nerror: transport error: connection reset\n");
    }

    #[test]
    fn cancelled_prints_marker_only() {
        let mut r = make_renderer(true);
        r.on_snapshot(&snapshot(None, "abc"));
        r.on_finish(&RequestOutcome {
            state: RequestState::Cancelled,
            snapshot: None,
        });
        let s = output_str(&r);
        assert!(s.ends_with("\r\x1b[Kcancelled\n"), "got {s:?}");
        assert!(!s.contains("abc\n"));
    }
}
