//! The caller-facing side of a pipeline run.
//!
//! A `ResponseStream` yields text fragments and ends with either `None`
//! (complete) or one `Err` (failed). The final text is delivered once
//! through a separate `CompletionSignal`. Dropping the stream cancels the
//! run.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::DropGuard;

use crate::core::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    QuerySynthesis,
    Retrieving,
    ContextBuilt,
    Responding,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// What the run task sends to the stream.
#[derive(Debug)]
pub(crate) enum StreamEvent {
    Fragment(String),
    Done,
    Failed(PipelineError),
}

/// Resolves exactly once with the full response text or the terminal error.
pub struct CompletionSignal {
    receiver: oneshot::Receiver<Result<String, PipelineError>>,
}

impl CompletionSignal {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<String, PipelineError>>) -> Self {
        Self { receiver }
    }

    pub async fn wait(self) -> Result<String, PipelineError> {
        self.receiver.await.unwrap_or(Err(PipelineError::Cancelled))
    }
}

pub struct ResponseStream {
    events: mpsc::Receiver<StreamEvent>,
    drained: Option<oneshot::Sender<()>>,
    completion: Option<CompletionSignal>,
    state: watch::Receiver<PipelineState>,
    finished: bool,
    _cancel: DropGuard,
}

impl ResponseStream {
    pub(crate) fn new(
        events: mpsc::Receiver<StreamEvent>,
        drained: oneshot::Sender<()>,
        completion: CompletionSignal,
        state: watch::Receiver<PipelineState>,
        cancel: DropGuard,
    ) -> Self {
        Self {
            events,
            drained: Some(drained),
            completion: Some(completion),
            state,
            finished: false,
            _cancel: cancel,
        }
    }

    /// Takes the completion signal; `None` if already taken.
    pub fn take_completion(&mut self) -> Option<CompletionSignal> {
        self.completion.take()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver that outlives the stream, for observing the final state.
    pub fn state_watch(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }
}

impl Stream for ResponseStream {
    type Item = Result<String, PipelineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.events.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(StreamEvent::Fragment(text))) => Poll::Ready(Some(Ok(text))),
            Poll::Ready(Some(StreamEvent::Done)) => {
                self.finished = true;
                if let Some(ack) = self.drained.take() {
                    let _ = ack.send(());
                }
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Failed(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(PipelineError::Generation(
                    "pipeline ended without a terminal event".to_string(),
                ))))
            }
        }
    }
}
