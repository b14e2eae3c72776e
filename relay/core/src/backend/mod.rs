//! LLM Backend Integration
//!
//! Provider access behind the [`LlmBackend`] trait.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: any `/chat/completions` SSE endpoint, DashScope
//!   compatible mode by default
//! - **Scripted**: in-memory replay for tests
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{BackendConfig, LlmBackend, OpenAiCompatBackend};
//!
//! let backend = OpenAiCompatBackend::new(BackendConfig::new(url, key, "qwen-plus"))?;
//! let frames = backend.open_stream(&request).await?;
//! ```

mod openai_compat;
mod scripted;
mod sse;
mod traits;

pub use openai_compat::OpenAiCompatBackend;
pub use scripted::{ScriptStep, ScriptedBackend};
pub use sse::{sse_frames, SseLineBuffer};
pub use traits::{
    is_reasoning_model, BackendConfig, BackendError, ChatMessage, ChatRequest, ChatRole,
    LlmBackend, UpstreamFrame, UpstreamStream, DEFAULT_BASE_URL, DEFAULT_MODEL,
};
