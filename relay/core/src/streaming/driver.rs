//! Stream Driver
//!
//! Runs one upstream streaming call per user request: open the call, route
//! every frame through a [`StageDecoder`], forward the resulting events to a
//! [`StageSink`] and stop at the first terminal event.
//!
//! The upstream call is a plain stream owned by the driver's future, so it
//! is dropped (and the HTTP response closed) on every exit path, including
//! when the sink reports its consumer is gone.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use super::decoder::StageDecoder;
use crate::backend::{BackendError, ChatMessage, ChatRequest, LlmBackend, UpstreamFrame};
use crate::directive::parse_directive;
use crate::params::SharedParams;
use crate::stage::{SessionId, Stage, StageEvent};

/// Result of handing one event to a sink
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The event was taken
    Accepted,
    /// The consumer is gone; no further events will be taken
    Closed,
}

/// Destination for stage events
///
/// `deliver` must not block: sinks backed by a bounded buffer should drop
/// or close rather than wait.
pub trait StageSink: Send {
    /// Hand over one event
    fn deliver(&mut self, event: StageEvent) -> Delivery;
}

impl StageSink for Vec<StageEvent> {
    fn deliver(&mut self, event: StageEvent) -> Delivery {
        self.push(event);
        Delivery::Accepted
    }
}

impl StageSink for mpsc::Sender<StageEvent> {
    fn deliver(&mut self, event: StageEvent) -> Delivery {
        match self.try_send(event) {
            Ok(()) => Delivery::Accepted,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    session_id = %event.session_id(),
                    stage = %event.stage(),
                    "Channel full, closing sink"
                );
                Delivery::Closed
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

impl StageSink for mpsc::UnboundedSender<StageEvent> {
    fn deliver(&mut self, event: StageEvent) -> Delivery {
        match self.send(event) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::Closed,
        }
    }
}

/// Sink calling a closure for every event
pub struct CallbackSink<F>(pub F);

impl<F> StageSink for CallbackSink<F>
where
    F: FnMut(StageEvent) -> Delivery + Send,
{
    fn deliver(&mut self, event: StageEvent) -> Delivery {
        (self.0)(event)
    }
}

/// How a run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `Complete` was delivered
    Completed,
    /// `Error` was delivered
    Failed(String),
    /// The sink closed before a terminal event could be delivered
    Abandoned,
}

/// Summary of one run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamReport {
    /// Session the events were tagged with
    pub session_id: SessionId,
    /// How the run ended
    pub outcome: StreamOutcome,
    /// Events accepted by the sink
    pub delivered: usize,
}

/// Reasoning and answer of a collected, non-streamed run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThinkingResponse {
    /// Full reasoning text
    pub reasoning: String,
    /// Full answer text
    pub answer: String,
    /// Whether the stream ended gracefully
    pub complete: bool,
}

/// Collected-run failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The upstream call could not be opened
    #[error(transparent)]
    Upstream(#[from] BackendError),

    /// The stream ended with an error stage
    #[error("stream failed: {0}")]
    Stream(String),
}

/// Drives upstream calls through the decoder
#[derive(Clone)]
pub struct StreamDriver {
    backend: Arc<dyn LlmBackend>,
    params: SharedParams,
}

impl std::fmt::Debug for StreamDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDriver")
            .field("backend", &self.backend.name())
            .field("model", &self.backend.model())
            .finish_non_exhaustive()
    }
}

impl StreamDriver {
    /// Create a driver over `backend`, reading sampling values from `params`
    pub fn new(backend: Arc<dyn LlmBackend>, params: SharedParams) -> Self {
        Self { backend, params }
    }

    /// Backend requests go to
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.backend
    }

    /// Shared sampling parameters
    #[must_use]
    pub const fn params(&self) -> &SharedParams {
        &self.params
    }

    /// Stream one request into `sink`
    ///
    /// Exactly one terminal event is delivered unless the sink closes first.
    /// Open failures are not retried.
    pub async fn run<S: StageSink>(
        &self,
        messages: Vec<ChatMessage>,
        reasoning: bool,
        sink: &mut S,
    ) -> StreamReport {
        let session_id = SessionId::new();
        let mut decoder = StageDecoder::new(session_id, reasoning);
        let mut delivered = 0;

        let request = ChatRequest {
            messages,
            params: self.params.snapshot(),
            reasoning,
        };

        tracing::info!(
            session_id = %session_id,
            backend = self.backend.name(),
            reasoning,
            "Starting stream"
        );

        let mut upstream = match self.backend.open_stream(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Upstream open failed");
                let events = decoder.fail(e.to_string());
                return finish_report(session_id, sink, events, delivered);
            }
        };

        loop {
            let terminal = match upstream.next().await {
                Some(Ok(UpstreamFrame::Data(payload))) => {
                    tracing::trace!(session_id = %session_id, len = payload.len(), "Frame");
                    for event in decoder.decode_frame(&payload) {
                        if sink.deliver(event) == Delivery::Closed {
                            tracing::info!(session_id = %session_id, "Sink closed, dropping upstream");
                            return StreamReport {
                                session_id,
                                outcome: StreamOutcome::Abandoned,
                                delivered,
                            };
                        }
                        delivered += 1;
                    }
                    continue;
                }
                Some(Ok(UpstreamFrame::Done)) | None => decoder.finish(),
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Upstream read failed");
                    decoder.fail(e.to_string())
                }
            };

            drop(upstream);
            return finish_report(session_id, sink, terminal, delivered);
        }
    }

    /// Stream a raw user prompt into `sink`
    ///
    /// A trailing directive overrides the current reasoning default; the
    /// cleaned prompt is appended to `history`.
    pub async fn run_prompt<S: StageSink>(
        &self,
        text: &str,
        mut history: Vec<ChatMessage>,
        sink: &mut S,
    ) -> StreamReport {
        let directive = parse_directive(text, self.params.snapshot().reasoning_default);
        history.push(ChatMessage::user(directive.text));
        self.run(history, directive.reasoning, sink).await
    }

    /// Run a request to completion and collect its text
    ///
    /// # Errors
    ///
    /// Returns the upstream error if the call could not be opened, or the
    /// error message if the stream failed midway.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        reasoning: bool,
    ) -> Result<ThinkingResponse, RelayError> {
        let request = ChatRequest {
            messages,
            params: self.params.snapshot(),
            reasoning,
        };
        let mut upstream = self.backend.open_stream(&request).await?;

        let mut decoder = StageDecoder::new(SessionId::new(), reasoning);
        let mut response = ThinkingResponse::default();
        loop {
            let terminal = match upstream.next().await {
                Some(Ok(UpstreamFrame::Data(payload))) => {
                    for event in decoder.decode_frame(&payload) {
                        match event.stage() {
                            Stage::Reasoning => response.reasoning.push_str(event.text()),
                            Stage::Answer => response.answer.push_str(event.text()),
                            _ => {}
                        }
                    }
                    continue;
                }
                Some(Ok(UpstreamFrame::Done)) | None => decoder.finish(),
                Some(Err(e)) => decoder.fail(e.to_string()),
            };

            return match terminal.map(|e| (e.stage(), e.into_text())) {
                Some((Stage::Error, message)) => Err(RelayError::Stream(message)),
                _ => {
                    response.complete = true;
                    Ok(response)
                }
            };
        }
    }
}

fn finish_report<S: StageSink>(
    session_id: SessionId,
    sink: &mut S,
    terminal: Option<StageEvent>,
    delivered: usize,
) -> StreamReport {
    let Some(event) = terminal else {
        return StreamReport {
            session_id,
            outcome: StreamOutcome::Abandoned,
            delivered,
        };
    };

    let outcome = match event.stage() {
        Stage::Error => StreamOutcome::Failed(event.text().to_string()),
        _ => StreamOutcome::Completed,
    };

    if sink.deliver(event) == Delivery::Closed {
        return StreamReport {
            session_id,
            outcome: StreamOutcome::Abandoned,
            delivered,
        };
    }

    tracing::info!(session_id = %session_id, outcome = ?outcome, delivered = delivered + 1, "Stream finished");
    StreamReport {
        session_id,
        outcome,
        delivered: delivered + 1,
    }
}
