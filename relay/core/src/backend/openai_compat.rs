//! OpenAI-compatible Backend
//!
//! Streams `/chat/completions` over SSE. Defaults target DashScope's
//! compatible mode, where Qwen models accept a top-level `enable_thinking`
//! flag and stream their reasoning as `delta.reasoning_content`.
//!
//! # Endpoints
//!
//! - `POST {base}/chat/completions` - streaming chat completion
//! - `GET {base}/models` - used as a health probe

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::sse::sse_frames;
use super::traits::{
    is_reasoning_model, BackendConfig, BackendError, ChatRequest, LlmBackend, UpstreamStream,
};

/// OpenAI-compatible streaming client
#[derive(Clone)]
pub struct OpenAiCompatBackend {
    config: BackendConfig,
    reasoning: bool,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("reasoning", &self.reasoning)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatBackend {
    /// Create a backend from its connection settings
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            reasoning: is_reasoning_model(&config.model),
            config,
            http_client,
        })
    }

    /// Connection settings in use
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url())
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url())
    }

    /// JSON body for a streaming request
    pub(crate) fn build_body(&self, request: &ChatRequest) -> serde_json::Value {
        let params = &request.params;
        let mut body = json!({
            "model": self.config.model,
            "messages": request.messages,
            "stream": true,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "top_k": params.top_k,
            "stream_options": { "include_usage": true },
        });

        // Non-Qwen endpoints reject the unknown field
        if self.reasoning {
            body["enable_thinking"] = json!(request.reasoning);
        }

        body
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    fn name(&self) -> &'static str {
        "OpenAI-compatible"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_reasoning(&self) -> bool {
        self.reasoning
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<UpstreamStream, BackendError> {
        let body = self.build_body(request);

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            reasoning = request.reasoning,
            "Opening upstream stream"
        );

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Open(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        Ok(sse_frames(response.bytes_stream()))
    }
}
