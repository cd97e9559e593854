//! Pass-through observation of a proxied SSE byte stream.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::protocol::SseMessage;

use super::session::{Accumulator, StreamCompletion, StreamSession};

type ContentFn = Box<dyn FnMut(&str) + Send>;
type CompleteFn = Box<dyn FnOnce(StreamCompletion) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TapState {
    Streaming,
    /// Upstream yielded an error; bytes still pass, nothing is observed.
    Failed,
    Completing,
    Done,
}

pin_project! {
    /// Forwards every upstream item unchanged while parsing it on the side.
    ///
    /// Content fragments are reported through `on_content` as they are seen.
    /// When upstream ends, the decoder is flushed, an unterminated record is
    /// drained, and `on_complete` runs with the accumulated content, usage
    /// and reasoning. The tap yields its final `None` only after an async
    /// `on_complete` has finished.
    ///
    /// An upstream `Err` item is forwarded as-is; after it the tap stops
    /// observing and `on_complete` never runs.
    pub struct SseTap<S> {
        #[pin]
        upstream: S,
        session: StreamSession,
        accumulator: Accumulator,
        batch: Vec<SseMessage>,
        on_content: Option<ContentFn>,
        on_complete: Option<CompleteFn>,
        completing: Option<BoxFuture<'static, ()>>,
        state: TapState,
    }
}

impl<S> SseTap<S> {
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            session: StreamSession::new(),
            accumulator: Accumulator::default(),
            batch: Vec::with_capacity(8),
            on_content: None,
            on_complete: None,
            completing: None,
            state: TapState::Streaming,
        }
    }

    /// Called with each non-empty content fragment.
    #[must_use]
    pub fn on_content(mut self, f: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_content = Some(Box::new(f));
        self
    }

    /// Called once, after upstream ends cleanly.
    #[must_use]
    pub fn on_complete(mut self, f: impl FnOnce(StreamCompletion) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(move |completion| {
            f(completion);
            Box::pin(futures_util::future::ready(()))
        }));
        self
    }

    /// Like [`on_complete`](Self::on_complete), but the tap awaits the
    /// returned future before ending.
    #[must_use]
    pub fn on_complete_async<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(StreamCompletion) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_complete = Some(Box::new(move |completion| Box::pin(f(completion))));
        self
    }
}

fn observe(
    bytes: &[u8],
    session: &mut StreamSession,
    accumulator: &mut Accumulator,
    batch: &mut Vec<SseMessage>,
    on_content: &mut Option<ContentFn>,
) {
    session.push_bytes(bytes, batch);
    record(accumulator, batch, on_content);
}

fn record(
    accumulator: &mut Accumulator,
    batch: &mut Vec<SseMessage>,
    on_content: &mut Option<ContentFn>,
) {
    for message in batch.drain(..) {
        accumulator.apply(&message);
        if let (Some(delta), Some(f)) = (message.content_delta(), on_content.as_mut()) {
            f(delta);
        }
    }
}

impl<S, B, E> Stream for SseTap<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<B, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match *this.state {
                TapState::Streaming | TapState::Failed => {
                    match ready!(this.upstream.as_mut().poll_next(cx)) {
                        Some(Ok(chunk)) => {
                            if *this.state == TapState::Streaming {
                                observe(
                                    chunk.as_ref(),
                                    this.session,
                                    this.accumulator,
                                    this.batch,
                                    this.on_content,
                                );
                            }
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                        Some(Err(err)) => {
                            if *this.state == TapState::Streaming {
                                tracing::warn!("upstream sse stream failed; tap stops observing");
                            }
                            *this.state = TapState::Failed;
                            return Poll::Ready(Some(Err(err)));
                        }
                        None if *this.state == TapState::Failed => {
                            *this.state = TapState::Done;
                        }
                        None => {
                            this.session.finish(this.batch);
                            record(this.accumulator, this.batch, this.on_content);
                            let completion = std::mem::take(this.accumulator).into_completion();
                            match this.on_complete.take() {
                                Some(f) => {
                                    *this.completing = Some(f(completion));
                                    *this.state = TapState::Completing;
                                }
                                None => *this.state = TapState::Done,
                            }
                        }
                    }
                }
                TapState::Completing => {
                    if let Some(fut) = this.completing.as_mut() {
                        ready!(fut.as_mut().poll(cx));
                    }
                    *this.completing = None;
                    *this.state = TapState::Done;
                }
                TapState::Done => return Poll::Ready(None),
            }
        }
    }
}
