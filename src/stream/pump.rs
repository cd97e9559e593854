//! Callback-driven consumption of an SSE byte stream.

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::protocol::{SseMessage, TokenUsage};

use super::session::{Accumulator, StreamSession};

type MessageFn<'a> = Box<dyn FnMut(&SseMessage) + Send + 'a>;
type DeltaFn<'a> = Box<dyn FnMut(&str, &str) + Send + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type UsageFn<'a> = Box<dyn FnMut(&TokenUsage) + Send + 'a>;
type FinishFn<'a> = Box<dyn FnMut() + Send + 'a>;

/// Optional callbacks invoked by [`process_sse_stream`], in record order.
///
/// ```ignore
/// let mut callbacks = SseCallbacks::new()
///     .on_content(|delta, _full| print!("{delta}"))
///     .on_finish(|| println!());
/// ```
#[derive(Default)]
pub struct SseCallbacks<'a> {
    on_message: Option<MessageFn<'a>>,
    on_content: Option<DeltaFn<'a>>,
    on_reasoning: Option<DeltaFn<'a>>,
    on_error: Option<ErrorFn<'a>>,
    on_usage: Option<UsageFn<'a>>,
    on_finish: Option<FinishFn<'a>>,
}

impl<'a> SseCallbacks<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every parsed message, before any field-specific callback.
    #[must_use]
    pub fn on_message(mut self, f: impl FnMut(&SseMessage) + Send + 'a) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// `(delta, full_content_so_far)` for each non-empty content fragment.
    #[must_use]
    pub fn on_content(mut self, f: impl FnMut(&str, &str) + Send + 'a) -> Self {
        self.on_content = Some(Box::new(f));
        self
    }

    /// `(delta, full_reasoning_so_far)` for each non-empty reasoning fragment.
    #[must_use]
    pub fn on_reasoning(mut self, f: impl FnMut(&str, &str) + Send + 'a) -> Self {
        self.on_reasoning = Some(Box::new(f));
        self
    }

    /// Upstream error records and transport failures. Not called on abort.
    #[must_use]
    pub fn on_error(mut self, f: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_usage(mut self, f: impl FnMut(&TokenUsage) + Send + 'a) -> Self {
        self.on_usage = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_finish(mut self, f: impl FnMut() + Send + 'a) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }

    fn error(&mut self, text: &str) {
        if let Some(f) = self.on_error.as_mut() {
            f(text);
        }
    }

    fn dispatch(&mut self, message: &SseMessage, acc: &mut Accumulator) {
        acc.apply(message);

        if let Some(f) = self.on_message.as_mut() {
            f(message);
        }
        if let Some(delta) = message.content_delta() {
            if let Some(f) = self.on_content.as_mut() {
                f(delta, acc.content());
            }
        }
        if let Some(delta) = message.reasoning_delta() {
            if let Some(f) = self.on_reasoning.as_mut() {
                f(delta, acc.reasoning());
            }
        }
        if let Some(error) = message.error_text() {
            tracing::debug!("upstream error record: {error}");
            self.error(error);
        }
        if let Some(usage) = &message.usage {
            if let Some(f) = self.on_usage.as_mut() {
                f(usage);
            }
        }
        if message.is_finished() {
            if let Some(f) = self.on_finish.as_mut() {
                f();
            }
        }
    }

    fn dispatch_all(&mut self, batch: &mut Vec<SseMessage>, acc: &mut Accumulator) {
        for message in batch.drain(..) {
            self.dispatch(&message, acc);
        }
    }
}

/// Drive an SSE byte stream to completion, firing `callbacks` per message.
///
/// Returns the concatenated content. One UTF-8 decoder lives for the whole
/// stream and is flushed at the end, after which an unterminated final record
/// is drained.
///
/// Upstream error records do not stop consumption. A failed read is reported
/// through `on_error` and ends the pump with the content gathered so far.
///
/// # Errors
///
/// Returns [`StreamError::Aborted`] when the stream yields it (see
/// [`abortable`]); cancellation is never reported through `on_error`.
pub async fn process_sse_stream<S, B, E>(
    stream: S,
    callbacks: &mut SseCallbacks<'_>,
) -> Result<String, StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<StreamError>,
{
    let mut stream = std::pin::pin!(stream);
    let mut session = StreamSession::new();
    let mut acc = Accumulator::default();
    let mut batch: Vec<SseMessage> = Vec::with_capacity(8);

    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                session.push_bytes(chunk.as_ref(), &mut batch);
                callbacks.dispatch_all(&mut batch, &mut acc);
            }
            Err(err) => {
                let err: StreamError = err.into();
                if err.is_abort() {
                    tracing::debug!(
                        "sse stream aborted after {} content bytes",
                        acc.content().len()
                    );
                    return Err(err);
                }
                tracing::warn!("sse stream read failed: {err}");
                callbacks.error(err.message());
                return Ok(acc.into_content());
            }
        }
    }

    session.finish(&mut batch);
    callbacks.dispatch_all(&mut batch, &mut acc);
    Ok(acc.into_content())
}

/// Make a byte stream cancellable.
///
/// Once `token` is cancelled, the next poll yields
/// `Err(StreamError::Aborted)` and the stream ends.
pub fn abortable<S, B, E>(
    stream: S,
    token: CancellationToken,
) -> impl Stream<Item = Result<B, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    E: Into<StreamError>,
{
    futures_util::stream::unfold(
        (Box::pin(stream), token, false),
        |(mut stream, token, aborted)| async move {
            if aborted {
                return None;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => Some((Err(StreamError::Aborted), (stream, token, true))),
                item = stream.next() => {
                    item.map(|item| (item.map_err(Into::into), (stream, token, false)))
                }
            }
        },
    )
}
