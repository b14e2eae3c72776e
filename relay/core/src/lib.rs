//! Relay Core - Reasoning-aware LLM Streaming for thinking-relay
//!
//! This crate relays user prompts to a remote model service and streams the
//! output back to live client connections, keeping the model's "reasoning"
//! phase separate from its final "answer". It has no HTTP server of its own;
//! the daemon crate puts a transport in front of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Client Connections                       │
//! │      ┌─────────┐      ┌─────────┐      ┌─────────┐               │
//! │      │ conn-1  │      │ conn-2  │      │ conn-3  │   ...         │
//! │      └────▲────┘      └────▲────┘      └────▲────┘               │
//! │           │ OutboundQueue (bounded, drop-and-disconnect)         │
//! └───────────┼────────────────┼────────────────┼────────────────────┘
//!             │                │                │
//! ┌───────────┼────────────────┼────────────────┼────────────────────┐
//! │           └──────── ConnectionHub ◄─────────┘                    │
//! │                          ▲  HubSink                              │
//! │                          │                                       │
//! │  user text ──► parse_directive ──► StreamDriver ──► StageDecoder │
//! │                                        │                         │
//! │                                        ▼                         │
//! │                                   LlmBackend (SSE)               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StageEvent`]: One typed step of a streamed response
//! - [`StageDecoder`]: Classifies raw chunks into stages for one request
//! - [`StreamDriver`]: Runs one upstream call per request into a sink
//! - [`ConnectionHub`]: Live connections and their bounded queues
//! - [`SharedParams`]: Atomically replaced sampling parameters
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{ConnectionHub, OpenAiCompatBackend, SharedParams, StreamDriver};
//!
//! let backend = Arc::new(OpenAiCompatBackend::new(config.upstream.clone())?);
//! let driver = StreamDriver::new(backend, SharedParams::new(config.params));
//! let hub = ConnectionHub::new(config.outbound_queue_capacity);
//!
//! let (id, mut queue) = hub.register("user-42");
//! tokio::spawn(async move {
//!     while let Some(event) = queue.recv().await {
//!         // write event to the transport
//!     }
//! });
//!
//! let mut sink = hub.sink(id);
//! driver.run_prompt("Why is the sky blue? /think", Vec::new(), &mut sink).await;
//! ```
//!
//! # Module Overview
//!
//! - [`directive`]: Per-message `/think` and `/no_think` overrides
//! - [`stage`]: Stage events and session identifiers
//! - [`streaming`]: Stage decoding and the stream driver
//! - [`hub`]: Connection registry and outbound queues
//! - [`backend`]: LLM backend abstraction (OpenAI-compatible, scripted)
//! - [`params`]: Sampling parameters
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod directive;
pub mod hub;
pub mod params;
pub mod stage;
pub mod streaming;

// Re-exports for convenience
pub use backend::{
    BackendConfig, BackendError, ChatMessage, ChatRequest, ChatRole, LlmBackend,
    OpenAiCompatBackend, ScriptedBackend, UpstreamFrame, UpstreamStream,
};
pub use directive::{parse_directive, Directive};
pub use params::{ModelParams, ParamsError, SharedParams};
pub use stage::{SessionId, Stage, StageEvent};

// Streaming exports
pub use streaming::{
    CallbackSink, Delivery, ProviderChunk, RelayError, StageDecoder, StageSink, StreamDriver,
    StreamOutcome, StreamReport, ThinkingResponse,
};

// Hub exports
pub use hub::{
    ConnectionHub, ConnectionId, ConnectionInfo, ConnectionState, EnqueueOutcome, HubSink,
    OutboundQueue,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env,
    ConfigError, ConfigOverrides, ConfigSource, RelayConfig, RelayToml,
};
