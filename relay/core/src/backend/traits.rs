//! LLM Backend Traits
//!
//! The relay only needs one thing from a model provider: open a streaming
//! chat call and hand back its raw frames. Everything provider-specific (URL
//! layout, auth, request body, transport framing) stays behind
//! [`LlmBackend`]; classifying the frames into stages is the decoder's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ModelParams;

/// Default OpenAI-compatible endpoint (DashScope international)
pub const DEFAULT_BASE_URL: &str = "https://dashscope-intl.aliyuncs.com/compatible-mode/v1";

/// Default model identifier
pub const DEFAULT_MODEL: &str = "qwen-plus";

/// Upstream failures
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// The streaming call could not be established
    #[error("failed to open upstream stream: {0}")]
    Open(String),

    /// The upstream answered with a non-success status
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The body failed mid-stream
    #[error("upstream stream read failed: {0}")]
    Read(String),
}

impl BackendError {
    /// Whether the failure happened before any frame was read
    #[must_use]
    pub const fn is_open_failure(&self) -> bool {
        matches!(self, Self::Client(_) | Self::Open(_) | Self::Status { .. })
    }
}

/// One framed payload from the upstream body
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// A raw chunk payload, not yet parsed
    Data(String),
    /// Explicit end-of-stream marker
    Done,
}

/// Stream of upstream frames
///
/// Dropping the stream closes the underlying call.
pub type UpstreamStream = BoxStream<'static, Result<UpstreamFrame, BackendError>>;

/// Speaker of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// The human side
    User,
    /// A previous model turn
    Assistant,
}

/// One message of the conversation sent upstream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: ChatRole,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// Build a message with an explicit role
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Build a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Build an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Build a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// Everything needed to open one streaming call
#[derive(Clone, Debug)]
pub struct ChatRequest {
    /// Conversation, oldest first
    pub messages: Vec<ChatMessage>,
    /// Sampling snapshot taken when the request started
    pub params: Arc<ModelParams>,
    /// Whether the model should reason before answering
    pub reasoning: bool,
}

/// LLM Backend trait
///
/// Implement this trait to add support for another provider.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend name for logs and status output
    fn name(&self) -> &str;

    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Whether the model exposes a separate reasoning phase
    fn supports_reasoning(&self) -> bool;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Open one streaming call
    ///
    /// # Errors
    ///
    /// Returns an open failure when the call cannot be established or the
    /// upstream rejects it. Failures after this point surface as `Err`
    /// items on the returned stream.
    async fn open_stream(&self, request: &ChatRequest) -> Result<UpstreamStream, BackendError>;
}

/// Connection settings for an OpenAI-compatible backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl BackendConfig {
    /// Create a configuration for `model` at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Whether `model` names a reasoning-capable Qwen model
#[must_use]
pub fn is_reasoning_model(model: &str) -> bool {
    model.to_lowercase().contains("qwen")
}
