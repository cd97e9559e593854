use crate::protocol::{SseMessage, TokenUsage};

use super::decoder::Utf8StreamDecoder;
use super::sse::SseChunkParser;

/// Decoder plus carry-over buffer for one stream.
///
/// Both pumps allocate one per stream; nothing here is shared.
#[derive(Debug, Default)]
pub struct StreamSession {
    decoder: Utf8StreamDecoder,
    parser: SseChunkParser,
}

impl StreamSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one transport chunk and append every completed message.
    pub fn push_bytes(&mut self, bytes: &[u8], out: &mut Vec<SseMessage>) {
        if bytes.is_empty() {
            return;
        }
        let text = self.decoder.decode(bytes);
        self.parser.feed_into(&text, out);
    }

    /// End of stream: flush the decoder, then drain an unterminated record.
    pub fn finish(&mut self, out: &mut Vec<SseMessage>) {
        let tail = self.decoder.flush();
        self.parser.feed_into(&tail, out);
        self.parser.finish_into(out);
    }
}

/// Everything a finished stream produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
    /// `None` when the stream carried no reasoning text.
    pub reasoning: Option<String>,
}

/// Running totals for one stream. Append-only.
#[derive(Debug, Default)]
pub struct Accumulator {
    content: String,
    reasoning: String,
    usage: Option<TokenUsage>,
}

impl Accumulator {
    /// Fold one message into the totals.
    pub fn apply(&mut self, message: &SseMessage) {
        if let Some(delta) = message.content_delta() {
            self.content.push_str(delta);
        }
        if let Some(delta) = message.reasoning_delta() {
            self.reasoning.push_str(delta);
        }
        if let Some(usage) = &message.usage {
            self.usage = Some(usage.clone());
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    #[must_use]
    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    #[must_use]
    pub fn into_content(self) -> String {
        self.content
    }

    #[must_use]
    pub fn into_completion(self) -> StreamCompletion {
        StreamCompletion {
            content: self.content,
            usage: self.usage,
            reasoning: (!self.reasoning.is_empty()).then_some(self.reasoning),
        }
    }
}
