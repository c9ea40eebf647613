//! Newline-delimited JSON stream decoder.
//!
//! Splits a byte stream into `\n`-terminated records and decodes each record
//! into a [`ResponseEvent`]. Chunk boundaries may fall anywhere, including
//! inside a multi-byte character; the unterminated tail of each chunk is
//! carried over and completed by the next one.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use oc_protocol::ResponseEvent;
use tracing::{debug, warn};

/// Longest slice of a rejected line echoed into the log.
const LOG_PREVIEW_CHARS: usize = 120;

/// Incremental line splitter and record decoder.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    /// Bytes of the current, not yet terminated line.
    carry: BytesMut,
    /// Prefix of `carry` already known to contain no separator.
    scanned: usize,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk. Returns every record completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ResponseEvent> {
        self.carry.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line = self.carry.split_to(end + 1);
            self.scanned = 0;
            if let Some(event) = decode_line(&line[..end]) {
                events.push(event);
            }
        }
        self.scanned = self.carry.len();

        events
    }

    /// Flush at end of stream. The residual text is decoded once; if it is
    /// not a complete record it is dropped.
    pub fn finish(&mut self) -> Option<ResponseEvent> {
        self.scanned = 0;
        let rest = self.carry.split();
        let text = std::str::from_utf8(&rest).ok()?.trim();
        if text.is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "dropping unterminated trailing record");
                None
            }
        }
    }

    /// Number of carried-over bytes waiting for a separator.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn decode_line(line: &[u8]) -> Option<ResponseEvent> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!(error = %e, "skipping stream record with invalid UTF-8");
            return None;
        }
    };

    if text.is_empty() {
        return None;
    }

    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            let preview: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
            warn!(error = %e, line = %preview, "skipping malformed stream record");
            None
        }
    }
}

/// Stream wrapper that decodes records from a byte stream.
pub struct NdjsonStream<S> {
    inner: S,
    decoder: NdjsonDecoder,
    pending: VecDeque<ResponseEvent>,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: NdjsonDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<ResponseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.decoder.feed(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.pending.extend(this.decoder.finish());
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Create a record stream from a byte stream.
pub fn parse_ndjson_stream<S, E>(stream: S) -> NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    NdjsonStream::new(stream)
}
