//! Scripted Backend
//!
//! In-memory backend replaying a fixed list of frames. Every call replays
//! the same script, which keeps driver and hub tests off the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;

use super::traits::{BackendError, ChatRequest, LlmBackend, UpstreamFrame, UpstreamStream};

/// One step of a script
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Yield a raw frame
    Frame(UpstreamFrame),
    /// Yield a read error, ending the stream
    ReadError(String),
    /// Never yield again
    Hang,
}

/// Backend replaying a script
#[derive(Debug)]
pub struct ScriptedBackend {
    model: String,
    reasoning: bool,
    open_error: Option<BackendError>,
    steps: Vec<ScriptStep>,
    requests: Mutex<Vec<ChatRequest>>,
    live_streams: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// Empty script for `model`
    ///
    /// Reasoning support follows the same model-name rule as real backends.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            reasoning: super::traits::is_reasoning_model(&model),
            model,
            open_error: None,
            steps: Vec::new(),
            requests: Mutex::new(Vec::new()),
            live_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every open with `error`
    #[must_use]
    pub fn failing_open(mut self, error: BackendError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Append a raw data frame
    #[must_use]
    pub fn data(mut self, payload: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Frame(UpstreamFrame::Data(payload.into())));
        self
    }

    /// Append a reasoning delta chunk
    #[must_use]
    pub fn reasoning(self, text: &str) -> Self {
        self.data(json!({"choices": [{"delta": {"reasoning_content": text}}]}).to_string())
    }

    /// Append an answer delta chunk
    #[must_use]
    pub fn answer(self, text: &str) -> Self {
        self.data(json!({"choices": [{"delta": {"content": text}}]}).to_string())
    }

    /// Append a tool call chunk
    #[must_use]
    pub fn tool_call(self, name: &str, arguments: &str) -> Self {
        self.data(
            json!({"choices": [{"delta": {"tool_calls": [
                {"function": {"name": name, "arguments": arguments}}
            ]}}]})
            .to_string(),
        )
    }

    /// Append a usage chunk
    #[must_use]
    pub fn usage(self, prompt: u64, completion: u64, total: u64) -> Self {
        self.data(
            json!({"choices": [], "usage": {
                "prompt_tokens": prompt,
                "completion_tokens": completion,
                "total_tokens": total
            }})
            .to_string(),
        )
    }

    /// Append the end marker
    #[must_use]
    pub fn done(mut self) -> Self {
        self.steps.push(ScriptStep::Frame(UpstreamFrame::Done));
        self
    }

    /// Append a read failure
    #[must_use]
    pub fn read_error(mut self, message: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::ReadError(message.into()));
        self
    }

    /// Stop yielding without ending the stream
    #[must_use]
    pub fn hang(mut self) -> Self {
        self.steps.push(ScriptStep::Hang);
        self
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Streams opened and not yet dropped
    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_reasoning(&self) -> bool {
        self.reasoning
    }

    async fn health_check(&self) -> bool {
        self.open_error.is_none()
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<UpstreamStream, BackendError> {
        self.requests.lock().push(request.clone());

        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        let mut items = Vec::new();
        let mut hang = false;
        for step in &self.steps {
            match step {
                ScriptStep::Frame(frame) => items.push(Ok(frame.clone())),
                ScriptStep::ReadError(message) => {
                    items.push(Err(BackendError::Read(message.clone())));
                    break;
                }
                ScriptStep::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let tail: UpstreamStream = if hang {
            futures::stream::pending().boxed()
        } else {
            futures::stream::empty().boxed()
        };

        let guard = LiveGuard::new(&self.live_streams);
        let stream = futures::stream::iter(items).chain(tail).map(move |item| {
            let _live = &guard;
            item
        });
        Ok(stream.boxed())
    }
}
