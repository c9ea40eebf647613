//! Single-pass tokenizer for answer text.
//!
//! Recognises fenced code blocks, `**bold**` spans, and runs of `N. item`
//! lines. A fence may open at the end of a text line and close inside a
//! code line. Each piece of text is classified exactly once, so text produced by one
//! rule is never re-read by another. Purely presentational: nothing here
//! feeds back into the thinking/answer split.

const FENCE: &str = "```";
const STRONG: &str = "**";
const DEFAULT_LANGUAGE: &str = "text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Strong(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Code { language: String, code: String },
    OrderedList(Vec<Vec<Inline>>),
}

/// Split `text` into plain and strong spans. An unpaired `**` is literal;
/// a strong span never crosses a line break.
pub fn inlines(text: &str) -> Vec<Inline> {
    let mut spans = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(open) = rest.find(STRONG) {
        let after = &rest[open + STRONG.len()..];
        match after.find(STRONG) {
            Some(close) if !after[..close].contains('\n') => {
                plain.push_str(&rest[..open]);
                if !plain.is_empty() {
                    spans.push(Inline::Text(std::mem::take(&mut plain)));
                }
                spans.push(Inline::Strong(after[..close].to_string()));
                rest = &after[close + STRONG.len()..];
            }
            _ => {
                plain.push_str(&rest[..open + STRONG.len()]);
                rest = after;
            }
        }
    }

    plain.push_str(rest);
    if !plain.is_empty() {
        spans.push(Inline::Text(plain));
    }
    spans
}

fn is_language_tag(tag: &str) -> bool {
    tag.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Opening fence ending `line`: byte offset of the backticks and the
/// language tag. A fence may follow text on the same line.
fn fence_open(line: &str) -> Option<(usize, String)> {
    line.match_indices(FENCE).find_map(|(at, _)| {
        let tag = line[at + FENCE.len()..].trim_end();
        if !is_language_tag(tag) {
            return None;
        }
        let language = if tag.is_empty() { DEFAULT_LANGUAGE } else { tag };
        Some((at, language.to_string()))
    })
}

/// Body of an `N. body` line.
fn list_item(line: &str) -> Option<&str> {
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    let body = rest.trim_start();
    if body.len() == rest.len() {
        return None;
    }
    Some(body)
}

struct OpenFence<'a> {
    /// Full line that opened the fence.
    opening: &'a str,
    /// Text before the backticks on the opening line.
    lead: &'a str,
    language: String,
    lines: Vec<&'a str>,
}

#[derive(Default)]
struct Tokenizer<'a> {
    blocks: Vec<Block>,
    paragraph: Vec<&'a str>,
    items: Vec<&'a str>,
    fence: Option<OpenFence<'a>>,
}

impl<'a> Tokenizer<'a> {
    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = self.paragraph.join("\n");
        self.paragraph.clear();
        if !text.trim().is_empty() {
            self.blocks.push(Block::Paragraph(inlines(&text)));
        }
    }

    fn flush_list(&mut self) {
        if self.items.is_empty() {
            return;
        }
        let items = self.items.drain(..).map(inlines).collect();
        self.blocks.push(Block::OrderedList(items));
    }

    fn close_fence(&mut self, last: &'a str) {
        let Some(mut fence) = self.fence.take() else {
            return;
        };
        fence.lines.push(last);
        if !fence.lead.trim().is_empty() {
            self.paragraph.push(fence.lead.trim_end());
        }
        self.flush_paragraph();
        self.blocks.push(Block::Code {
            language: fence.language,
            code: fence.lines.join("\n").trim().to_string(),
        });
    }

    fn line(&mut self, line: &'a str) {
        if self.fence.is_some() {
            // The closing fence may end a line of code.
            match line.find(FENCE) {
                Some(at) => {
                    self.close_fence(&line[..at]);
                    let rest = &line[at + FENCE.len()..];
                    if !rest.trim().is_empty() {
                        self.line(rest);
                    }
                }
                None => {
                    if let Some(fence) = self.fence.as_mut() {
                        fence.lines.push(line);
                    }
                }
            }
            return;
        }

        if let Some((at, language)) = fence_open(line) {
            self.flush_list();
            self.fence = Some(OpenFence {
                opening: line,
                lead: &line[..at],
                language,
                lines: Vec::new(),
            });
        } else if let Some(item) = list_item(line) {
            self.flush_paragraph();
            self.items.push(item);
        } else {
            self.flush_list();
            self.paragraph.push(line);
        }
    }

    fn finish(mut self) -> Vec<Block> {
        // An unterminated fence is still being streamed: show it as text.
        if let Some(fence) = self.fence.take() {
            self.flush_list();
            self.paragraph.push(fence.opening);
            self.paragraph.extend(fence.lines);
        }
        self.flush_paragraph();
        self.flush_list();
        self.blocks
    }
}

/// Tokenize answer text into blocks.
pub fn tokenize(text: &str) -> Vec<Block> {
    let mut tokenizer = Tokenizer::default();
    for line in text.split('\n') {
        tokenizer.line(line.strip_suffix('\r').unwrap_or(line));
    }
    tokenizer.finish()
}
