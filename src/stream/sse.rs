//! SSE record splitting and record parsing.
//!
//! Text arriving in arbitrary chunk boundaries is split on the blank-line
//! record delimiter; each complete record is parsed into an [`SseMessage`].
//! Untagged records are treated as chat-completion chunks and normalized;
//! `event:`-tagged records are application events and stay opaque.
use memchr::{memchr, memmem};
use smallvec::SmallVec;
use std::sync::LazyLock;

use crate::protocol::{normalize_payload, SseMessage};

const DONE_SENTINEL: &str = "[DONE]";
const RECORD_DELIMITER: &str = "\n\n";

static RECORD_DELIMITER_FINDER: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(RECORD_DELIMITER.as_bytes()));

/// Result of [`parse_sse_chunk`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseParseResult {
    pub messages: Vec<SseMessage>,
    /// Trailing text that does not yet form a complete record.
    pub remaining_buffer: String,
}

// ---------------------------------------------------------------------------
// Record parsing
// ---------------------------------------------------------------------------

/// Parse one SSE record (line endings already `\n`, delimiter excluded).
///
/// - `:` comment lines and blank lines are skipped
/// - the last `event:` line names the record
/// - `data:` lines lose the prefix and at most one following space, and are
///   joined with `\n`
///
/// Untagged records: `[DONE]` yields `{finished}`, empty data yields `None`,
/// anything else is normalized, falling back to `{payload}` when no known
/// field is found. Tagged records yield `{event}` plus either `finished`
/// (for `[DONE]`) or the raw `payload`.
#[must_use]
pub fn parse_sse_block(block: &str) -> Option<SseMessage> {
    let mut event: Option<&str> = None;
    let mut data_lines: SmallVec<[&str; 4]> = SmallVec::new();

    for line in block.split('\n') {
        if line.trim().is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // id:, retry: and unknown fields carry nothing we surface
    }

    let joined;
    let data = if data_lines.len() == 1 {
        data_lines[0].trim()
    } else {
        joined = data_lines.join("\n");
        joined.trim()
    };

    match event.filter(|name| !name.is_empty()) {
        None => {
            if data == DONE_SENTINEL {
                return Some(SseMessage::done());
            }
            if data.is_empty() {
                return None;
            }
            let payload = decode_data(data);
            match normalize_payload(&payload) {
                Some(message) => Some(message),
                None => Some(SseMessage {
                    payload: Some(payload),
                    ..SseMessage::default()
                }),
            }
        }
        Some(name) => {
            let mut message = SseMessage {
                event: Some(name.to_owned()),
                ..SseMessage::default()
            };
            if data == DONE_SENTINEL {
                message.finished = Some(true);
            } else if !data.is_empty() {
                message.payload = Some(decode_data(data));
            }
            Some(message)
        }
    }
}

/// JSON-decode record data, degrading to the raw text on failure.
fn decode_data(data: &str) -> serde_json::Value {
    serde_json::from_str(data).unwrap_or_else(|err| {
        tracing::trace!("sse data is not JSON ({err}); keeping raw text");
        serde_json::Value::String(data.to_owned())
    })
}

// ---------------------------------------------------------------------------
// Chunk splitting
// ---------------------------------------------------------------------------

/// Split `buffer + chunk` into complete records and parse them.
///
/// Pure: the caller threads `remaining_buffer` into the next call. Never
/// fails; malformed records degrade to raw payloads.
#[must_use]
pub fn parse_sse_chunk(chunk: &str, buffer: &str) -> SseParseResult {
    if chunk.is_empty() && buffer.is_empty() {
        return SseParseResult::default();
    }

    let mut working = String::with_capacity(buffer.len() + chunk.len());
    working.push_str(buffer);
    working.push_str(chunk);
    normalize_line_endings(&mut working);

    let mut messages = Vec::new();
    let consumed = drain_records(&working, &mut messages);
    SseParseResult {
        messages,
        remaining_buffer: working.split_off(consumed),
    }
}

/// Parse every complete record in `text`, returning the byte offset just
/// past the last delimiter consumed.
fn drain_records(text: &str, out: &mut Vec<SseMessage>) -> usize {
    let mut cursor = 0usize;
    while let Some(rel) = RECORD_DELIMITER_FINDER.find(&text.as_bytes()[cursor..]) {
        let block = &text[cursor..cursor + rel];
        if !block.trim().is_empty() {
            if let Some(message) = parse_sse_block(block) {
                out.push(message);
            }
        }
        cursor += rel + RECORD_DELIMITER.len();
    }
    cursor
}

/// Rewrite `\r\n` to `\n` in place. A trailing lone `\r` is kept so that a
/// pair split across chunks still collapses on the next call.
fn normalize_line_endings(text: &mut String) {
    if memchr(b'\r', text.as_bytes()).is_some() {
        *text = text.replace("\r\n", "\n");
    }
}

// ---------------------------------------------------------------------------
// Buffer-threading wrapper
// ---------------------------------------------------------------------------

/// Owns the carry-over buffer for one stream.
///
/// Feed it decoded text in arbitrary chunk boundaries; call
/// [`finish`](Self::finish) at end of stream to drain a final record that
/// arrived without its blank-line terminator.
#[derive(Debug, Default)]
pub struct SseChunkParser {
    buffer: String,
}

impl SseChunkParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<SseMessage> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed text and append parsed messages into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseMessage>) {
        if chunk.is_empty() && self.buffer.is_empty() {
            return;
        }
        self.buffer.push_str(chunk);
        normalize_line_endings(&mut self.buffer);
        let consumed = drain_records(&self.buffer, out);
        if consumed == self.buffer.len() {
            self.buffer.clear();
        } else if consumed > 0 {
            self.buffer.drain(..consumed);
        }
    }

    /// Drain whatever is left, treating end of stream as a delimiter.
    pub fn finish(&mut self) -> Vec<SseMessage> {
        let mut out = Vec::new();
        self.finish_into(&mut out);
        out
    }

    pub fn finish_into(&mut self, out: &mut Vec<SseMessage>) {
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return;
        }
        self.feed_into(RECORD_DELIMITER, out);
        self.buffer.clear();
    }

    /// Text held back waiting for a delimiter.
    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
